mod app;
mod cli;
mod config;
mod dispatcher;
mod error;
mod hw;
mod profile;
mod protocol;
mod sink;
mod supervisor;
mod telemetry;

pub use app::{run, run_with_clients};
pub use cli::{Args, LogLevel};
pub use config::{Config, DeviceConfig, ScanConfig, SinkConfig};
pub use dispatcher::Dispatcher;
pub use error::{ConfigError, DecodeError, InteractionError, SinkError};
pub use hw::{
    BleCentral, DeviceLink, FakeCentral, FakeCentralConfig, FakeOperation, FoundDevice,
    Notification, NotificationStream, ScriptedNotification, WriteMode, WriteRecord, real_central,
};
pub use profile::{CharacteristicRole, DeviceKind, DeviceProfile};
pub use protocol::Reading;
pub use sink::{DeviceStatus, OpenhabSink, RecordingSink, SinkEvent, TelemetrySink};
pub use supervisor::{ConnectionState, RetryPolicy, SessionOutcome, Supervisor};
