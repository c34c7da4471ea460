//! Saved-session streams.
//!
//! A session is a sequence of JSON values, one per line:
//!
//! 1. the header string `engine_version;format;requirement;...`
//! 2. the number of data objects that follow
//! 3. the data objects, default sequence collection first
//! 4. display settings
//! 5. protocol editor state
//! 6. open output tabs and the selected tab
//!
//! Reading never touches the live registry. The caller installs the
//! [`RestoredSession`] once the whole stream has been read successfully.

use crate::{
    cancel::CancellationToken,
    catalog::{DataFormatCatalog, PluginRegistry},
    data::{Collection, DataKind, DataObject},
    error::EngineError,
    pool::WorkerPool,
    protocol::ProtocolState,
};
use motiflab_protocol::{
    HeaderError, PLUGIN_REQUIREMENT_PREFIX, SessionHeader, plugin_requirement,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    io::{BufReader, Read, Write},
};

/// First format whose `Output.format` is a name rather than an integer code.
const OUTPUT_FORMAT_NAMES_SINCE: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(
        "This session was saved in format {found} but this version of MotifLab only reads up to format {supported}. Please upgrade to a newer version"
    )]
    NeedsNewerVersion { found: u32, supported: u32 },

    #[error("This session requires components that are not installed: {}", .0.join(", "))]
    MissingRequirements(Vec<String>),

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error("The session ends before the {0} section")]
    Truncated(&'static str),

    #[error("Unreadable {section} in session: {message}")]
    Malformed { section: String, message: String },
}

impl SessionError {
    /// The stream is well formed but this engine can not load it.
    pub fn is_compatibility(&self) -> bool {
        matches!(
            self,
            Self::NeedsNewerVersion { .. } | Self::MissingRequirements(_)
        )
    }

    fn malformed(section: impl Into<String>, message: impl ToString) -> Self {
        Self::Malformed {
            section: section.into(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub hidden_tracks: Vec<String>,
    pub colors: BTreeMap<String, String>,
    /// Added in session format 2.
    pub track_heights: BTreeMap<String, u32>,
    pub sequence_window_width: u32,
    pub show_sequence_names: bool,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            hidden_tracks: Vec::new(),
            colors: BTreeMap::new(),
            track_heights: BTreeMap::new(),
            sequence_window_width: 800,
            show_sequence_names: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputTabs {
    pub tabs: Vec<String>,
    pub selected: Option<String>,
}

impl OutputTabs {
    /// Drops tabs that do not name an available output.
    pub fn retain_existing(&mut self, exists: impl Fn(&str) -> bool) {
        self.tabs.retain(|t| exists(t));
        if self.selected.as_ref().is_some_and(|s| !self.tabs.contains(s)) {
            self.selected = None;
        }
    }
}

/// Non-data state that travels with a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceState {
    pub display: DisplaySettings,
    pub protocol: ProtocolState,
    pub tabs: OutputTabs,
}

/// Everything needed to write a session, captured under the engine lock.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Default sequence collection first.
    pub objects: Vec<DataObject>,
    pub workspace: WorkspaceState,
}

impl SessionSnapshot {
    /// Sorted, de-duplicated requirements of every object.
    pub fn requirements(&self) -> Vec<String> {
        let mut reqs: Vec<String> = self
            .objects
            .iter()
            .flat_map(DataObject::requirements)
            .collect();
        reqs.sort();
        reqs.dedup();
        reqs
    }
}

fn write_line<W: Write>(writer: &mut W, line: &str) -> Result<(), EngineError> {
    writer
        .write_all(line.as_bytes())
        .and_then(|_| writer.write_all(b"\n"))
        .map_err(|e| EngineError::io("Could not write session", e))
}

fn to_json<T: Serialize>(value: &T) -> Result<String, EngineError> {
    serde_json::to_string(value)
        .map_err(|e| EngineError::Internal(format!("Could not serialize session: {e}")))
}

/// Writes `snapshot` and returns the number of data objects written.
/// Objects are serialized on the worker pool.
pub fn write_session<W: Write>(
    writer: &mut W,
    engine_version: &str,
    snapshot: &SessionSnapshot,
    pool: &WorkerPool,
) -> Result<usize, EngineError> {
    let header = SessionHeader::new(engine_version, snapshot.requirements());
    let encoded: Vec<Result<String, EngineError>> = pool.map_bounded(
        snapshot.objects.iter().collect(),
        |o: &DataObject| to_json(o),
    )?;

    write_line(writer, &to_json(&header.encode())?)?;
    write_line(writer, &snapshot.objects.len().to_string())?;
    for line in encoded {
        write_line(writer, &line?)?;
    }
    write_line(writer, &to_json(&snapshot.workspace.display)?)?;
    write_line(writer, &to_json(&snapshot.workspace.protocol)?)?;
    write_line(writer, &to_json(&snapshot.workspace.tabs)?)?;
    writer
        .flush()
        .map_err(|e| EngineError::io("Could not write session", e))?;
    Ok(snapshot.objects.len())
}

/// A fully read session, not yet installed.
#[derive(Debug, Clone)]
pub struct RestoredSession {
    pub header: SessionHeader,
    pub default_collection: Option<Collection>,
    /// All other objects in stream order.
    pub objects: Vec<DataObject>,
    pub workspace: WorkspaceState,
}

impl RestoredSession {
    /// Objects ordered so that collections find their members and open
    /// output tabs are recreated before the remaining objects.
    pub fn insertion_order(&self) -> Vec<&DataObject> {
        let tier = |o: &DataObject| match o.kind() {
            DataKind::Sequence | DataKind::Motif | DataKind::Module => 0,
            _ if self.workspace.tabs.tabs.iter().any(|t| t == o.name()) => 1,
            _ => 2,
        };
        let mut ordered: Vec<&DataObject> = self.objects.iter().collect();
        ordered.sort_by_key(|o| tier(*o));
        ordered
    }
}

pub struct SessionReader<'a> {
    plugins: &'a PluginRegistry,
    formats: &'a DataFormatCatalog,
    max_format: u32,
    poll_interval: usize,
}

type ValueStream<R> = serde_json::StreamDeserializer<'static, serde_json::de::IoRead<BufReader<R>>, Value>;

fn next_value<R: Read>(stream: &mut ValueStream<R>, section: &'static str) -> Result<Value, SessionError> {
    match stream.next() {
        None => Err(SessionError::Truncated(section)),
        Some(Err(e)) if e.is_eof() => Err(SessionError::Truncated(section)),
        Some(Err(e)) => Err(SessionError::malformed(section, e)),
        Some(Ok(value)) => Ok(value),
    }
}

fn next_section<R: Read, T: DeserializeOwned>(
    stream: &mut ValueStream<R>,
    section: &'static str,
) -> Result<T, SessionError> {
    let value = next_value(stream, section)?;
    serde_json::from_value(value).map_err(|e| SessionError::malformed(section, e))
}

impl<'a> SessionReader<'a> {
    pub fn new(plugins: &'a PluginRegistry, formats: &'a DataFormatCatalog) -> Self {
        Self {
            plugins,
            formats,
            max_format: motiflab_protocol::SESSION_FORMAT_VERSION,
            poll_interval: crate::cancel::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn max_format(mut self, max_format: u32) -> Self {
        self.max_format = max_format;
        self
    }

    pub fn poll_interval(mut self, interval: usize) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Reads a whole session. `progress` receives `(objects_read, object_count)`.
    pub fn read<R: Read>(
        &self,
        reader: R,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<RestoredSession, EngineError> {
        cancel.check()?;
        let mut stream: ValueStream<R> =
            serde_json::Deserializer::from_reader(BufReader::new(reader)).into_iter::<Value>();

        let header_text: String = next_section(&mut stream, "header")?;
        let header = SessionHeader::decode(&header_text).map_err(SessionError::from)?;
        if header.format > self.max_format {
            return Err(SessionError::NeedsNewerVersion {
                found: header.format,
                supported: self.max_format,
            }
            .into());
        }
        let missing = self.unmet_requirements(&header);
        if !missing.is_empty() {
            return Err(SessionError::MissingRequirements(missing).into());
        }

        let count: u64 = next_section(&mut stream, "object count")?;
        let count = usize::try_from(count)
            .map_err(|e| SessionError::malformed("object count", e))?;
        let mut poller = cancel.poller(self.poll_interval);
        let mut default_collection = None;
        let mut objects = Vec::with_capacity(count.min(4096));
        for index in 0..count {
            poller.tick()?;
            let mut value = next_value(&mut stream, "data objects")?;
            self.upgrade_object(&mut value, header.format);
            if let Some(plugin) = value.get("plugin").and_then(Value::as_str) {
                if !self.plugins.contains(plugin) {
                    return Err(
                        SessionError::MissingRequirements(vec![plugin_requirement(plugin)]).into(),
                    );
                }
            }
            let object: DataObject = serde_json::from_value(value)
                .map_err(|e| SessionError::malformed(format!("data object {}", index + 1), e))?;
            match object {
                DataObject::SequenceCollection(c) if index == 0 => default_collection = Some(c),
                other => objects.push(other),
            }
            progress(index + 1, count);
        }

        let display: DisplaySettings = next_section(&mut stream, "display settings")?;
        let protocol: ProtocolState = next_section(&mut stream, "protocol")?;
        let tabs: OutputTabs = next_section(&mut stream, "output tabs")?;
        cancel.check()?;

        Ok(RestoredSession {
            header,
            default_collection,
            objects,
            workspace: WorkspaceState {
                display,
                protocol,
                tabs,
            },
        })
    }

    /// Header requirements this engine cannot satisfy. Plugin requirements are
    /// met by an installed plugin; any other kind of requirement is unknown here
    /// and always reported.
    fn unmet_requirements(&self, header: &SessionHeader) -> Vec<String> {
        header
            .requirements
            .iter()
            .filter(|req| match req.strip_prefix(PLUGIN_REQUIREMENT_PREFIX) {
                Some(plugin) => !self.plugins.contains(plugin),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Rewrites an object saved by an older format into the current layout.
    fn upgrade_object(&self, value: &mut Value, format: u32) {
        if format >= OUTPUT_FORMAT_NAMES_SINCE || value.get("kind").and_then(Value::as_str) != Some("Output") {
            return;
        }
        let Some(code) = value.get("format").and_then(Value::as_u64) else {
            return;
        };
        let name = u32::try_from(code)
            .ok()
            .and_then(|c| self.formats.name_for_legacy_code(c))
            .unwrap_or_else(|| {
                tracing::warn!(code, "unknown legacy output format code, using Plain");
                "Plain".to_string()
            });
        value["format"] = Value::String(name);
    }
}
