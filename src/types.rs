use crossterm::style::Color;

/// One unit of container output. `content` is the raw bytes as read from the
/// stream, including the trailing newline when the source provided one.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub pod_name: String,
    pub container_name: String,
    pub content: Vec<u8>,
    pub pod_color: Option<Color>,
    pub container_color: Option<Color>,
}
