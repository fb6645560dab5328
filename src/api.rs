//! The public entry points: one-call helpers and the session builder.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use crate::compare::VersionTolerance;
use crate::config::{ReferencePolicy, Settings, StampMode};
use crate::error::Result;
use crate::meta::TypeRegistry;
use crate::obj::Obj;
use crate::pack::Pack;
use crate::reader::GraphDeserializer;
use crate::surrogate::SurrogateRegistry;
use crate::writer::GraphSerializer;

/// Configures and opens serialization sessions.
///
/// A builder is cheap to clone and reusable; the registries it carries are
/// shared, so types registered through one session are visible to every
/// session holding the same `Arc`s.
///
/// ```no_run
/// use snapgraph::{Obj, Snapgraph, StampMode, VersionTolerance};
///
/// # #[derive(Default, snapgraph::SnapObject)]
/// # struct Scene { name: String }
/// let builder = Snapgraph::builder()
///     .stamping(StampMode::Full)
///     .tolerance(VersionTolerance::all());
/// let scene = Obj::new(Scene::default());
/// let bytes = builder.to_vec(&scene)?;
/// let restored: Obj<Scene> = builder.from_slice(&bytes)?;
/// # Ok::<(), snapgraph::SnapError>(())
/// ```
#[derive(Clone)]
pub struct SessionBuilder {
    settings: Settings,
    provider: Arc<TypeRegistry>,
    surrogates: Arc<SurrogateRegistry>,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            provider: Arc::new(TypeRegistry::new()),
            surrogates: Arc::new(SurrogateRegistry::new()),
        }
    }
}

impl SessionBuilder {
    /// Starts from the default settings and fresh registries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the type-stamping mode recorded in the stream header.
    pub fn stamping(mut self, mode: StampMode) -> Self {
        self.settings.stamping = mode;
        self
    }

    /// Sets the schema-drift leniency applied on read.
    pub fn tolerance(mut self, tolerance: VersionTolerance) -> Self {
        self.settings.tolerance = tolerance;
        self
    }

    /// Sets the reference-table lifetime across records.
    pub fn references(mut self, policy: ReferencePolicy) -> Self {
        self.settings.references = policy;
        self
    }

    /// Treats collections as opaque, refusing to traverse them.
    pub fn opaque_collections(mut self, opaque: bool) -> Self {
        self.settings.opaque_collections = opaque;
        self
    }

    /// Uses a shared metadata provider instead of a private one.
    pub fn provider(mut self, provider: Arc<TypeRegistry>) -> Self {
        self.provider = provider;
        self
    }

    /// Uses a shared surrogate rule set.
    pub fn surrogates(mut self, surrogates: Arc<SurrogateRegistry>) -> Self {
        self.surrogates = surrogates;
        self
    }

    /// Opens a serializer over `sink` and writes the stream header.
    pub fn serializer<W: Write>(&self, sink: W) -> Result<GraphSerializer<W>> {
        GraphSerializer::new(
            sink,
            self.settings,
            self.provider.clone(),
            self.surrogates.clone(),
        )
    }

    /// Opens a deserializer over `source` and validates the header.
    pub fn deserializer<R: Read>(&self, source: R) -> Result<GraphDeserializer<R>> {
        GraphDeserializer::new(
            source,
            self.settings,
            self.provider.clone(),
            self.surrogates.clone(),
        )
    }

    /// Serializes one root into a fresh, padded byte buffer.
    pub fn to_vec<T: Pack + Default + 'static>(&self, root: &Obj<T>) -> Result<Vec<u8>> {
        let mut serializer = self.serializer(Vec::new())?;
        serializer.serialize(root)?;
        serializer.close()
    }

    /// Deserializes one root out of a byte buffer.
    pub fn from_slice<T: Pack + Default + 'static>(&self, bytes: &[u8]) -> Result<Obj<T>> {
        let mut deserializer = self.deserializer(bytes)?;
        deserializer.deserialize()
    }

    /// Serializes one root into a file.
    pub fn save<T: Pack + Default + 'static>(
        &self,
        path: impl AsRef<Path>,
        root: &Obj<T>,
    ) -> Result<()> {
        let file = File::create(path)?;
        let mut serializer = self.serializer(BufWriter::new(file))?;
        serializer.serialize(root)?;
        serializer.close()?.flush()?;
        Ok(())
    }

    /// Deserializes one root out of a file.
    pub fn load<T: Pack + Default + 'static>(&self, path: impl AsRef<Path>) -> Result<Obj<T>> {
        let file = File::open(path)?;
        let mut deserializer = self.deserializer(BufReader::new(file))?;
        deserializer.deserialize()
    }
}

/// One-call helpers using default settings and private registries.
///
/// Reach for [`Snapgraph::builder`] when you need stamping, tolerance,
/// reference policies, shared registries, or surrogates.
pub struct Snapgraph;

impl Snapgraph {
    /// Starts configuring a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Serializes one root into a byte buffer with default settings.
    pub fn to_vec<T: Pack + Default + 'static>(root: &Obj<T>) -> Result<Vec<u8>> {
        SessionBuilder::new().to_vec(root)
    }

    /// Deserializes one root out of a byte buffer with default settings.
    pub fn from_slice<T: Pack + Default + 'static>(bytes: &[u8]) -> Result<Obj<T>> {
        SessionBuilder::new().from_slice(bytes)
    }

    /// Serializes one root into a file with default settings.
    pub fn save<T: Pack + Default + 'static>(
        path: impl AsRef<Path>,
        root: &Obj<T>,
    ) -> Result<()> {
        SessionBuilder::new().save(path, root)
    }

    /// Deserializes one root out of a file with default settings.
    pub fn load<T: Pack + Default + 'static>(path: impl AsRef<Path>) -> Result<Obj<T>> {
        SessionBuilder::new().load(path)
    }
}
