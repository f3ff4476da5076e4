//! Output files of a session
//!
//! - `naming`: output directory and base-name layout
//! - `stream`: the capture-process supervision loop that publishes segments
//! - `chat`: the XML chat transcript writer that follows those segments

mod chat;
mod naming;
mod stream;

pub use chat::{escape_xml, format_record, ChatRecorder, DanmakuFile, XML_FOOTER, XML_HEADER};
pub use naming::{base_name, output_dir, sanitize, Segment};
pub use stream::{StreamCapture, QUICK_EXIT};

pub(crate) use stream::pause;
