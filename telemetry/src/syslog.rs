use std::{
    fmt::{self, Write as _},
    io,
    os::unix::net::UnixDatagram,
    path::Path,
};

use tracing::{
    field::{Field, Visit},
    Event, Level, Subscriber,
};
use tracing_subscriber::{layer::Context, Layer};

/// `LOG_DAEMON`, as in `<syslog.h>`.
const FACILITY_DAEMON: u8 = 3;

/// A [`Layer`] that sends every event as a local syslog datagram.
///
/// Messages use the minimal BSD format `<PRI>ident[pid]: message`, which the local daemon
/// timestamps on receipt. Send errors are ignored: the system log going away must never take
/// the process with it.
#[derive(Debug)]
pub struct SyslogLayer {
    socket: UnixDatagram,
    identifier: String,
    pid: u32,
}

impl SyslogLayer {
    pub fn connect(path: impl AsRef<Path>, identifier: &str) -> io::Result<Self> {
        let socket = UnixDatagram::unbound()?;
        socket.connect(path)?;
        Ok(Self {
            socket,
            identifier: identifier.to_owned(),
            pid: std::process::id(),
        })
    }

    fn format(&self, level: Level, message: &str) -> String {
        format!(
            "<{}>{}[{}]: {message}",
            priority(level),
            self.identifier,
            self.pid
        )
    }
}

fn priority(level: Level) -> u8 {
    let severity = match level {
        Level::ERROR => 3,
        Level::WARN => 4,
        Level::INFO => 6,
        // debug and trace
        _ => 7,
    };
    FACILITY_DAEMON * 8 + severity
}

impl<S: Subscriber> Layer<S> for SyslogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let line = self.format(*event.metadata().level(), &visitor.finish());
        let _ = self.socket.send(line.as_bytes());
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_owned()
        } else {
            self.message + &self.fields
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={value}", field.name());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={value:?}", field.name());
        }
    }
}
