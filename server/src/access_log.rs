//! Append-only access log.
//!
//! One [`AccessRecord`] per accepted request. Sinks must accept concurrent
//! appends and write each record as a single unit.

use std::{
    fmt::{self, Write as _},
    io::{self, Write},
    net::SocketAddr,
    str::FromStr,
    sync::Mutex,
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// Audit entry for a request from an authenticated peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessRecord {
    pub timestamp:        DateTime<Utc>,
    pub remote_address:   SocketAddr,
    pub peer_common_name: String,
    pub method:           String,
    pub path:             String,
}

impl fmt::Display for AccessRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.remote_address.ip(),
            Escaped(&self.peer_common_name),
            self.method,
            Escaped(&self.path)
        )
    }
}

/// Text-line field with control characters and backslashes escaped
struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            match c {
                '\\' => f.write_str("\\\\")?,
                c if c.is_control() => write!(f, "{}", c.escape_default())?,
                c => f.write_char(c)?,
            }
        }
        Ok(())
    }
}

/// Destination for access records
pub trait AccessLog: Send + Sync {
    /// Append one record; implementations must not interleave records
    fn append(&self, record: &AccessRecord) -> io::Result<()>;
}

/// Line format written by [`WriterAccessLog`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessLogFormat {
    /// `<timestamp> <remote ip> <CN> <method> <path>`
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

impl FromStr for AccessLogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown access log format {other:?} (expected text or json)")),
        }
    }
}

impl AccessLogFormat {
    /// Render a record as one newline-terminated line
    pub fn render(self, record: &AccessRecord) -> io::Result<String> {
        let mut line = match self {
            Self::Text => record.to_string(),
            Self::Json => serde_json::to_string(record)?,
        };
        line.push('\n');
        Ok(line)
    }
}

/// Writes records as lines to any `Write`, one `write_all` per record under a
/// mutex
pub struct WriterAccessLog<W> {
    writer: Mutex<W>,
    format: AccessLogFormat,
}

impl<W: Write + Send> WriterAccessLog<W> {
    pub fn new(writer: W, format: AccessLogFormat) -> Self {
        Self {
            writer: Mutex::new(writer),
            format,
        }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl WriterAccessLog<io::Stdout> {
    /// Access log on standard output
    pub fn stdout(format: AccessLogFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}

impl<W: Write + Send> AccessLog for WriterAccessLog<W> {
    fn append(&self, record: &AccessRecord) -> io::Result<()> {
        // render outside the lock
        let line = self.format.render(record)?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| io::Error::other("access log writer poisoned"))?;
        writer.write_all(line.as_bytes())?;
        writer.flush()
    }
}

/// Keeps records in memory; used by tests and embedders that ship records
/// elsewhere
#[derive(Debug, Default)]
pub struct MemoryAccessLog {
    records: Mutex<Vec<AccessRecord>>,
}

impl MemoryAccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything appended so far, in append order
    pub fn records(&self) -> Vec<AccessRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AccessLog for MemoryAccessLog {
    fn append(&self, record: &AccessRecord) -> io::Result<()> {
        self.records
            .lock()
            .map_err(|_| io::Error::other("access log poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use chrono::TimeZone;

    use super::*;

    fn record(cn: &str, path: &str) -> AccessRecord {
        AccessRecord {
            timestamp:        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
            remote_address:   "192.0.2.7:50122".parse().unwrap(),
            peer_common_name: cn.to_string(),
            method:           "GET".to_string(),
            path:             path.to_string(),
        }
    }

    #[test]
    fn text_line_matches_classic_layout() {
        let line = AccessLogFormat::Text.render(&record("client-1", "/")).unwrap();
        assert_eq!(line, "2024-05-01T12:30:00.000Z 192.0.2.7 client-1 GET /\n");
    }

    #[test]
    fn control_characters_cannot_forge_extra_lines() {
        let forged = "alice\n2030-01-01T00:00:00.000Z 10.0.0.1 admin GET /secret";
        let line = AccessLogFormat::Text
            .render(&record(forged, "/a\r\u{1b}[2J"))
            .unwrap();

        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));
        assert_eq!(
            line,
            "2024-05-01T12:30:00.000Z 192.0.2.7 \
             alice\\n2030-01-01T00:00:00.000Z 10.0.0.1 admin GET /secret GET /a\\r\\u{1b}[2J\n"
        );
    }

    #[test]
    fn backslashes_are_escaped_in_text_lines() {
        let line = AccessLogFormat::Text.render(&record("ops\\n", "/")).unwrap();
        assert_eq!(line, "2024-05-01T12:30:00.000Z 192.0.2.7 ops\\\\n GET /\n");
    }

    #[test]
    fn json_line_carries_every_field() {
        let line = AccessLogFormat::Json.render(&record("client-1", "/x")).unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["peer_common_name"], "client-1");
        assert_eq!(value["remote_address"], "192.0.2.7:50122");
        assert_eq!(value["method"], "GET");
        assert_eq!(value["path"], "/x");
        assert!(value["timestamp"].as_str().unwrap().starts_with("2024-05-01T12:30:00"));
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<AccessLogFormat>().unwrap(), AccessLogFormat::Json);
        assert_eq!(" text ".parse::<AccessLogFormat>().unwrap(), AccessLogFormat::Text);
        assert!("xml".parse::<AccessLogFormat>().is_err());
    }

    #[test]
    fn concurrent_appends_never_interleave() {
        let log = Arc::new(WriterAccessLog::new(Vec::new(), AccessLogFormat::Text));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                thread::spawn(move || {
                    for i in 0..50 {
                        let path = format!("/thread/{t}/request/{i}/{}", "x".repeat(200));
                        log.append(&record(&format!("client-{t}"), &path)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let log = Arc::try_unwrap(log).ok().expect("all appenders finished");
        let output = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 400);

        for line in lines {
            let fields: Vec<_> = line.split(' ').collect();
            assert_eq!(fields.len(), 5, "corrupted line: {line}");
            let cn = fields[2].strip_prefix("client-").unwrap();
            assert!(fields[4].starts_with(&format!("/thread/{cn}/request/")));
        }
    }

    #[test]
    fn memory_log_keeps_append_order() {
        let log = MemoryAccessLog::new();
        log.append(&record("a", "/1")).unwrap();
        log.append(&record("b", "/2")).unwrap();

        let names: Vec<_> = log
            .records()
            .into_iter()
            .map(|r| r.peer_common_name)
            .collect();
        assert_eq!(names, ["a", "b"]);
    }
}
