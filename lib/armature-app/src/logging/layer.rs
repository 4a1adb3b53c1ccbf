use std::{
    fmt,
    str::FromStr as _,
    sync::OnceLock,
};

use chrono::{
    format::{DelayedFormat, Item, StrftimeItems},
    Utc,
};
use chrono_tz::Tz;
use tracing::{field, Event, Subscriber};
use tracing_subscriber::{
    field::VisitOutput,
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields, Layer, MakeWriter},
    layer,
    registry::LookupSpan,
    Layer as _,
};

use super::LoggingConfiguration;

const APP_NAME: &str = "ARMATURE";

pub fn build_formatting_layer<S, W>(config: &LoggingConfiguration, writer: W) -> Box<dyn layer::Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    if config.log_format_json {
        Layer::new()
            .json()
            .flatten_event(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer)
            .boxed()
    } else {
        Layer::new()
            .event_format(PipeDelimitedFormatter::new(APP_NAME))
            .with_writer(writer)
            .boxed()
    }
}

/// Formats events as pipe-delimited lines.
///
/// Each line looks like `<time> | <APP> | <LEVEL> | (<file>:<line>) | <key>:<value>,... | <message>`, with the
/// structured fields section omitted when an event has none.
pub(super) struct PipeDelimitedFormatter {
    app_name: String,
}

impl PipeDelimitedFormatter {
    pub(super) fn new(app_name: &str) -> Self {
        // "armature-demo" and "Armature Demo" both become "ARMATUREDEMO".
        let app_name = app_name.to_uppercase().replace(['-', ' '], "");
        Self { app_name }
    }
}

impl<S, N> FormatEvent<S, N> for PipeDelimitedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let metadata = event.metadata();

        write!(
            writer,
            "{} | {} | {} | ",
            delayed_format_now(),
            self.app_name,
            metadata.level()
        )?;

        match (metadata.file(), metadata.line()) {
            (Some(file), Some(line)) => write!(writer, "({}:{})", file, line)?,
            _ => writer.write_str("(unknown:0)")?,
        }

        let mut visitor = PipeDelimitedFieldVisitor::new(writer.by_ref());
        event.record(&mut visitor);
        visitor.finish()?;

        writeln!(writer)
    }
}

/// Writes event fields as `key:value` pairs, followed by the message.
///
/// The first field is preceded by ` | `, subsequent fields by `,`. The message is buffered and written last, after its
/// own ` | `. The first write error is kept and returned from `finish`; everything after it is skipped.
struct PipeDelimitedFieldVisitor<'writer> {
    writer: Writer<'writer>,
    fields_written: usize,
    message: String,
    result: fmt::Result,
}

impl<'writer> PipeDelimitedFieldVisitor<'writer> {
    fn new(writer: Writer<'writer>) -> Self {
        Self {
            writer,
            fields_written: 0,
            message: String::new(),
            result: Ok(()),
        }
    }

    fn write_field(&mut self, field: &field::Field, f: impl FnOnce(&mut dyn fmt::Write) -> fmt::Result) {
        if self.result.is_err() {
            return;
        }

        if field.name() == "message" {
            self.result = f(&mut self.message);
            return;
        }

        let lead = if self.fields_written == 0 { " | " } else { "," };
        self.result = write!(self.writer, "{}{}:", lead, field.name()).and_then(|()| f(&mut self.writer));
        if self.result.is_ok() {
            self.fields_written += 1;
        }
    }
}

impl field::Visit for PipeDelimitedFieldVisitor<'_> {
    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        // Only structured fields are quoted.
        self.write_field(field, |w| {
            if field.name() == "message" {
                write!(w, "{:?}", value)
            } else {
                write!(w, "\"{:?}\"", value)
            }
        });
    }

    fn record_str(&mut self, field: &field::Field, value: &str) {
        self.write_field(field, |w| {
            if field.name() == "message" {
                w.write_str(value)
            } else {
                write!(w, "\"{}\"", value)
            }
        });
    }

    fn record_f64(&mut self, field: &field::Field, value: f64) {
        self.write_field(field, |w| write!(w, "{}", value));
    }

    fn record_i64(&mut self, field: &field::Field, value: i64) {
        self.write_field(field, |w| write!(w, "{}", value));
    }

    fn record_u64(&mut self, field: &field::Field, value: u64) {
        self.write_field(field, |w| write!(w, "{}", value));
    }

    fn record_bool(&mut self, field: &field::Field, value: bool) {
        self.write_field(field, |w| write!(w, "{}", value));
    }

    fn record_error(&mut self, field: &field::Field, value: &(dyn std::error::Error + 'static)) {
        self.write_field(field, |w| write!(w, "\"{}\"", value));
    }
}

impl VisitOutput<fmt::Result> for PipeDelimitedFieldVisitor<'_> {
    fn finish(mut self) -> fmt::Result {
        self.result?;

        if self.message.is_empty() {
            Ok(())
        } else {
            write!(self.writer, " | {}", self.message)
        }
    }
}

/// Gets a delayed formatter for the current time, in the local timezone.
fn delayed_format_now() -> DelayedFormat<impl Iterator<Item = &'static Item<'static>> + Clone> {
    // Falls back to UTC if the system timezone can't be determined.
    static SYSTEM_TZ: OnceLock<Tz> = OnceLock::new();
    let system_tz = SYSTEM_TZ.get_or_init(|| {
        iana_time_zone::get_timezone()
            .ok()
            .and_then(|raw_tz| Tz::from_str(&raw_tz).ok())
            .unwrap_or(Tz::UTC)
    });

    // Equivalent to `2024-12-31 23:59:59 UTC`.
    static FORMAT_ITEMS: OnceLock<Vec<Item<'static>>> = OnceLock::new();
    let format_items =
        FORMAT_ITEMS.get_or_init(|| StrftimeItems::new("%Y-%m-%d %H:%M:%S %Z").collect::<Vec<_>>());

    Utc::now().with_timezone(system_tz).format_with_items(format_items.iter())
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::{Arc, Mutex},
    };

    use tracing::{info, warn};
    use tracing_subscriber::layer::SubscriberExt as _;

    use super::*;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Capture {
        type Writer = Capture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture<F: FnOnce()>(config: &LoggingConfiguration, f: F) -> String {
        let writer = Capture::default();
        let subscriber = tracing_subscriber::registry().with(build_formatting_layer(config, writer.clone()));
        tracing::subscriber::with_default(subscriber, f);
        writer.contents()
    }

    #[test]
    fn app_name_normalization() {
        assert_eq!(PipeDelimitedFormatter::new("armature-demo").app_name, "ARMATUREDEMO");
        assert_eq!(PipeDelimitedFormatter::new("Armature Demo").app_name, "ARMATUREDEMO");
    }

    #[test]
    fn pipe_delimited_line() {
        let output = capture(&LoggingConfiguration::default(), || {
            info!(component_id = "db-conn", attempts = 3, ready = true, "Service started.");
        });

        let line = output.lines().next().unwrap();
        let sections = line.split(" | ").collect::<Vec<_>>();
        assert_eq!(sections.len(), 6, "line: {}", line);
        assert_eq!(sections[1], "ARMATURE");
        assert_eq!(sections[2], "INFO");
        assert!(sections[3].starts_with('(') && sections[3].contains("layer.rs:"));
        assert_eq!(sections[4], "component_id:\"db-conn\",attempts:3,ready:true");
        assert_eq!(sections[5], "Service started.");
    }

    #[test]
    fn no_fields_section_without_fields() {
        let output = capture(&LoggingConfiguration::default(), || warn!("Observer failed."));

        let line = output.lines().next().unwrap();
        assert_eq!(line.split(" | ").count(), 5, "line: {}", line);
        assert!(line.ends_with(" | Observer failed."));
    }

    #[test]
    fn json_format() {
        let config = LoggingConfiguration {
            log_format_json: true,
            ..Default::default()
        };
        let output = capture(&config, || info!(component_id = "db-conn", "Service started."));

        let event: serde_json::Value = serde_json::from_str(output.lines().next().unwrap()).unwrap();
        assert_eq!(event["component_id"], "db-conn");
        assert_eq!(event["message"], "Service started.");
        assert_eq!(event["level"], "INFO");
    }
}
