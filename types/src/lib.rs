pub mod events;
pub mod items;
pub mod logs;
pub mod session;

pub use events::{ClientEvent, ServerEvent};
pub use items::ResponseItem;
pub use logs::{LogEntry, LogLevel};
pub use session::{EngineSelection, InitConfig, InitConfigBuilder, TtsFileType};
