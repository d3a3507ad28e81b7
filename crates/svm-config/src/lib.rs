//! Configuration model and tracing setup for the `svm-jdwp` debug server.
//!
//! Every section and key has a default, so an empty TOML file is a valid
//! configuration.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

/// Environment variable consulted when no `--config` path is given.
pub const CONFIG_ENV_VAR: &str = "SVM_JDWP_CONFIG";

pub const DEFAULT_MAX_PACKET_LEN: usize = 16 * 1024 * 1024; // 16 MiB

/// Top-level configuration for the debug server.
///
/// ```toml
/// [server]
/// port = 8000
///
/// [vm]
/// main_class = "TestClass"
///
/// [[classes]]
/// name = "sys.Component"
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugServerConfig {
    pub server: ServerConfig,
    /// Wire widths of every id kind. Fixed for the lifetime of the process.
    pub ids: IdSizesConfig,
    pub vm: VmConfig,
    /// Reference types the debugger may ask about, in registration order.
    pub classes: Vec<ClassConfig>,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Largest inbound packet accepted, header included.
    pub max_packet_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_owned(),
            port: 8000,
            max_packet_len: DEFAULT_MAX_PACKET_LEN,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdSizesConfig {
    pub field_id: usize,
    pub method_id: usize,
    pub object_id: usize,
    pub reference_type_id: usize,
    pub frame_id: usize,
}

impl Default for IdSizesConfig {
    fn default() -> Self {
        Self {
            field_id: 2,
            method_id: 2,
            object_id: 4,
            reference_type_id: 4,
            frame_id: 4,
        }
    }
}

/// Identity of the debugged VM and its fixed thread topology.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    pub description: String,
    pub jdwp_major: u32,
    pub jdwp_minor: u32,
    pub version: String,
    pub name: String,
    pub main_class: String,
    pub main_source: String,

    pub process_thread_id: u64,
    pub jdwp_thread_id: u64,
    pub app_thread_id: u64,
    pub main_thread_group_id: u64,
    pub sub_thread_group_id: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            description: "Sedona VM_DEBUG_MODE v1.28d".to_owned(),
            jdwp_major: 1,
            jdwp_minor: 1,
            version: "1.28".to_owned(),
            name: "SedonaVM".to_owned(),
            main_class: "TestClass".to_owned(),
            main_source: "TestClass.java".to_owned(),
            process_thread_id: 0x1001,
            jdwp_thread_id: 0x1002,
            app_thread_id: 0x1003,
            main_thread_group_id: 0x2001,
            sub_thread_group_id: 0x2002,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassConfig {
    /// Dotted class name, e.g. `sys.Component`.
    pub name: String,
    pub source_file: Option<String>,
    /// Must name a class registered earlier. Defaults to `java.lang.Object`.
    pub superclass: Option<String>,
    pub modifiers: u32,
    pub interface: bool,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldConfig>,
    pub methods: Vec<MethodConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    pub name: String,
    pub signature: String,
    pub modifiers: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodConfig {
    pub name: String,
    pub signature: String,
    pub modifiers: u32,
    /// `[code_index, line]` pairs.
    pub lines: Vec<(u64, u32)>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    pub level: String,

    /// Emit logs as JSON lines.
    pub json: bool,

    /// Write logs to stderr.
    pub stderr: bool,

    /// Append logs to this file as well. If it cannot be opened, file logging is
    /// skipped and the other sinks stay active.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
            stderr: true,
            file: None,
        }
    }
}

impl LoggingConfig {
    fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return "info".to_owned();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// The effective filter: the configured level with any `RUST_LOG`
    /// directives merged on top.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // Keep the message only; the default rendering quotes the input text.
        ConfigError::Toml(err.message().to_owned())
    }
}

impl DebugServerConfig {
    /// Read, parse and validate a TOML config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::load_from_str(&text)?;
        tracing::debug!(
            target: "svm.config",
            path = %path.display(),
            classes = config.classes.len(),
            "loaded config"
        );
        Ok(config)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config from an explicit path, then [`CONFIG_ENV_VAR`], then defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let path = explicit.map(Path::to_path_buf).or_else(|| {
            std::env::var_os(CONFIG_ENV_VAR)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        });
        match path {
            Some(path) => Ok((Self::load_from_path(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ids = &self.ids;
        for (name, size) in [
            ("field_id", ids.field_id),
            ("method_id", ids.method_id),
            ("object_id", ids.object_id),
            ("reference_type_id", ids.reference_type_id),
            ("frame_id", ids.frame_id),
        ] {
            if !matches!(size, 1 | 2 | 4 | 8) {
                return Err(ConfigError::Invalid(format!(
                    "ids.{name} must be 1, 2, 4 or 8 (got {size})"
                )));
            }
        }
        if self.server.max_packet_len < 11 {
            return Err(ConfigError::Invalid(format!(
                "server.max_packet_len must cover the 11-byte header (got {})",
                self.server.max_packet_len
            )));
        }
        if self.vm.main_class.trim().is_empty() {
            return Err(ConfigError::Invalid("vm.main_class must not be empty".to_owned()));
        }
        if let Some(class) = self.classes.iter().find(|c| c.name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "class entry with superclass {:?} has no name",
                class.superclass
            )));
        }
        Ok(())
    }
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        MutexFileWriter {
            // A panic mid-write only loses part of a log line.
            guard: self.file.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

struct MutexFileWriter<'a> {
    guard: std::sync::MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Install the global `tracing` subscriber.
///
/// Safe to call more than once; only the first call has any effect.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = config.env_filter();

        let file = config.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_failed = config.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if config.stderr {
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            let file = Arc::new(Mutex::new(file));
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if config.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let _ = tracing_subscriber::registry().with(filter).with(layer).try_init();

        if file_failed {
            tracing::warn!(
                target: "svm.config",
                path = ?config.file,
                "failed to open log file; file logging disabled"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = DebugServerConfig::load_from_str("").unwrap();
        assert_eq!(config, DebugServerConfig::default());
        assert_eq!(config.server.address(), "127.0.0.1:8000");
        assert_eq!(config.ids.method_id, 2);
        assert_eq!(config.vm.app_thread_id, 0x1003);
    }

    #[test]
    fn classes_and_line_tables_parse() {
        let config = DebugServerConfig::load_from_str(
            r#"
            [server]
            port = 9000

            [vm]
            main_class = "app.Main"

            [[classes]]
            name = "app.Main"
            source_file = "Main.java"
            modifiers = 1

            [[classes.fields]]
            name = "count"
            signature = "I"

            [[classes.methods]]
            name = "main"
            signature = "([Ljava/lang/String;)V"
            modifiers = 9
            lines = [[0, 3], [4, 4]]
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind, "127.0.0.1");
        let class = &config.classes[0];
        assert_eq!(class.source_file.as_deref(), Some("Main.java"));
        assert_eq!(class.fields[0].signature, "I");
        assert_eq!(class.methods[0].lines, vec![(0, 3), (4, 4)]);
    }

    #[test]
    fn rejects_unsupported_id_sizes() {
        let err = DebugServerConfig::load_from_str("[ids]\nobject_id = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("object_id")));
    }

    #[test]
    fn packet_limit_must_cover_the_header() {
        assert_eq!(
            DebugServerConfig::default().server.max_packet_len,
            DEFAULT_MAX_PACKET_LEN
        );
        let err = DebugServerConfig::load_from_str("[server]\nmax_packet_len = 10\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("max_packet_len")));
    }

    #[test]
    fn rejects_empty_main_class() {
        let err = DebugServerConfig::load_from_str("[vm]\nmain_class = \"  \"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn toml_errors_are_reported() {
        let err = DebugServerConfig::load_from_str("[server]\nport = \"eighty\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn load_from_path_reads_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svm-jdwp.toml");
        std::fs::write(&path, "[logging]\nlevel = \"WARNING\"\njson = true\n").unwrap();

        let config = DebugServerConfig::load_from_path(&path).unwrap();
        assert!(config.logging.json);
        assert_eq!(LoggingConfig::normalize_level_directives(&config.logging.level), "warn");
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DebugServerConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn explicit_path_wins_in_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("explicit.toml");
        std::fs::write(&path, "[server]\nport = 8123\n").unwrap();

        let (config, used) = DebugServerConfig::resolve(Some(&path)).unwrap();
        assert_eq!(config.server.port, 8123);
        assert_eq!(used.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn level_directives_pass_through() {
        assert_eq!(LoggingConfig::normalize_level_directives(""), "info");
        assert_eq!(
            LoggingConfig::normalize_level_directives("svm.jdwp=trace,info"),
            "svm.jdwp=trace,info"
        );
    }
}
