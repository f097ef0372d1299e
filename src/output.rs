use std::io::Write;

use crossterm::style::{Color, Stylize};
use tokio::sync::mpsc;

use crate::types::LogRecord;

/// Capacity of the shared record channel. Producers block when the consumer
/// falls behind, which bounds memory by capacity times line size.
pub const RECORD_CHANNEL_CAPACITY: usize = 16;

/// Pod/container color pairs, cycled per pod: a bright shade for the pod
/// name and the matching normal shade for the container name.
const PALETTE: [(Color, Color); 6] = [
    (Color::Cyan, Color::DarkCyan),
    (Color::Green, Color::DarkGreen),
    (Color::Magenta, Color::DarkMagenta),
    (Color::Yellow, Color::DarkYellow),
    (Color::Blue, Color::DarkBlue),
    (Color::Red, Color::DarkRed),
];

/// Round-robin palette cursor. Owned by whoever creates tailer sets; one
/// `pick` per pod, reused for every container of that pod.
#[derive(Debug, Default)]
pub struct ColorPicker {
    next: usize,
}

impl ColorPicker {
    pub fn pick(&mut self) -> (Color, Color) {
        let pair = PALETTE[self.next];
        self.next = (self.next + 1) % PALETTE.len();
        pair
    }
}

/// Drain the shared channel, one record at a time, until every sender is
/// gone. The flush after each record keeps prefix and content contiguous
/// under concurrent producers.
pub async fn drain<W: Write>(
    rx: &mut mpsc::Receiver<LogRecord>,
    show_prefix: bool,
    out: &mut W,
) -> std::io::Result<()> {
    while let Some(record) = rx.recv().await {
        write_record(out, &record, show_prefix)?;
    }
    Ok(())
}

pub(crate) fn write_record<W: Write>(
    out: &mut W,
    record: &LogRecord,
    show_prefix: bool,
) -> std::io::Result<()> {
    if show_prefix {
        match (record.pod_color, record.container_color) {
            (Some(pod), Some(container)) => {
                write!(out, "{}", record.pod_name.as_str().with(pod))?;
                write!(
                    out,
                    "{}",
                    format!("[{}] ", record.container_name).with(container)
                )?;
            }
            _ => write!(out, "{}[{}] ", record.pod_name, record.container_name)?,
        }
    }
    out.write_all(&record.content)?;
    out.flush()
}
