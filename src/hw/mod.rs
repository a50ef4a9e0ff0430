mod btleplug_backend;
mod fake_backend;
mod hardware;

pub use self::fake_backend::{
    FakeCentral, FakeCentralConfig, FakeOperation, ScriptedNotification, WriteRecord,
};
pub use self::hardware::{
    BleCentral, DeviceLink, FoundDevice, Notification, NotificationStream, WriteMode, real_central,
};
