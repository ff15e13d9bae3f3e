// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stories and the TOML files they live in.
//!
//! Story files are parsed with [`toml_edit`] so that rewritten expectations can be written back
//! without disturbing comments, ordering or formatting elsewhere in the file.

use crate::{
    errors::{
        SchemaError, SchemaErrorKind, StepUpdateError, StoryCollectionError, StoryLoadError,
        StorySaveError,
    },
    schema::{Field, FieldType, Schema, join_path},
    version::{CURRENT_KEY, LEGACY_KEY, VersionedValue},
};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::io::Write;
use toml_edit::{DocumentMut, Item, TableLike, Value};
use tracing::{debug, info};

/// The file extension of story files.
pub const STORY_EXTENSION: &str = "story";

static RAISES_SCHEMA: Schema = Schema::new(&[
    Field::optional("type", FieldType::StrOrPerVersion),
    Field::optional("message", FieldType::StrOrPerVersion),
]);

static RUN_SCHEMA: Schema = Schema::new(&[
    Field::required("code", FieldType::Str),
    Field::optional("will-output", FieldType::Str),
    Field::optional("raises", FieldType::Table(&RAISES_SCHEMA)),
]);

static FILE_CONTENTS_SCHEMA: Schema = Schema::new(&[
    Field::required("filename", FieldType::Str),
    Field::required("contents", FieldType::Str),
]);

static STEP_SCHEMA: Schema = Schema::new(&[
    Field::optional(RUN_KIND, FieldType::Table(&RUN_SCHEMA)),
    Field::optional(FILE_CONTENTS_KIND, FieldType::Table(&FILE_CONTENTS_SCHEMA)),
]);

static GIVEN_SCHEMA: Schema = Schema::new(&[
    Field::optional("python-version", FieldType::Str),
    Field::optional("setup", FieldType::Str),
    Field::optional("files", FieldType::StrMap),
    Field::optional("scripts", FieldType::StrMap),
]);

static STORY_SCHEMA: Schema = Schema::new(&[
    Field::optional("description", FieldType::Str),
    Field::optional("importance", FieldType::Int),
    Field::optional("docs", FieldType::Str),
    Field::optional("fails-on-python-2", FieldType::Bool),
    Field::optional("given", FieldType::Table(&GIVEN_SCHEMA)),
    Field::required("steps", FieldType::TaggedList(&STEP_SCHEMA)),
]);

const RUN_KIND: &str = "run";
const FILE_CONTENTS_KIND: &str = "file-contents-will-be";

/// A single story: preconditions, metadata and an ordered list of steps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Story {
    name: String,
    slug: String,
    info: StoryInfo,
    given: Given,
    steps: Vec<Step>,
}

impl Story {
    /// The story's name, as written in the story file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A filesystem-safe form of the name.
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Descriptive metadata.
    pub fn info(&self) -> &StoryInfo {
        &self.info
    }

    /// Preconditions.
    pub fn given(&self) -> &Given {
        &self.given
    }

    /// The steps, in the order they run.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    fn from_table(name: &str, table: &dyn TableLike) -> Self {
        let given = table
            .get("given")
            .and_then(Item::as_table_like)
            .map(Given::from_table)
            .unwrap_or_default();
        let steps = table
            .get("steps")
            .map(|item| table_elements(item).into_iter().filter_map(Step::from_table).collect())
            .unwrap_or_default();
        Self {
            name: name.to_owned(),
            slug: slugify(name),
            info: StoryInfo {
                description: get_str(table, "description"),
                importance: table.get("importance").and_then(Item::as_integer),
                docs: get_str(table, "docs"),
                fails_on_python_2: table
                    .get("fails-on-python-2")
                    .and_then(Item::as_bool)
                    .unwrap_or(false),
            },
            given,
            steps,
        }
    }
}

/// Descriptive metadata for a story.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoryInfo {
    /// A human-readable description.
    pub description: Option<String>,
    /// Relative importance, for documentation.
    pub importance: Option<i64>,
    /// Extra documentation text.
    pub docs: Option<String>,
    /// True if the story is known not to pass under Python 2.
    pub fails_on_python_2: bool,
}

/// The preconditions of a story.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Given {
    /// The Python version to run under, unless overridden.
    pub python_version: Option<String>,
    /// Code run before every `run` step's code, with its output suppressed.
    pub setup: Option<String>,
    /// Files written into the scratch directory, by relative path.
    pub files: IndexMap<String, String>,
    /// Executable scripts written into the scratch directory, by relative path.
    pub scripts: IndexMap<String, String>,
}

impl Given {
    fn from_table(table: &dyn TableLike) -> Self {
        Self {
            python_version: get_str(table, "python-version"),
            setup: get_str(table, "setup"),
            files: get_str_map(table, "files"),
            scripts: get_str_map(table, "scripts"),
        }
    }
}

/// A single step of a story.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Run a code fragment and check its output and exception.
    Run(RunStep),
    /// Check the contents of a file in the scratch directory.
    FileContentsWillBe(FileContentsStep),
}

impl Step {
    /// The step kind as written in story files.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Run(_) => RUN_KIND,
            Self::FileContentsWillBe(_) => FILE_CONTENTS_KIND,
        }
    }

    fn from_table(table: &dyn TableLike) -> Option<Self> {
        let (kind, item) = table.iter().next()?;
        let params = item.as_table_like()?;
        match kind {
            RUN_KIND => Some(Self::Run(RunStep {
                code: get_str(params, "code")?,
                will_output: get_str(params, "will-output"),
                raises: params
                    .get("raises")
                    .and_then(Item::as_table_like)
                    .map(|raises| RaisesSpec {
                        exception_type: get_versioned(raises, "type"),
                        message: get_versioned(raises, "message"),
                    }),
            })),
            FILE_CONTENTS_KIND => Some(Self::FileContentsWillBe(FileContentsStep {
                filename: get_str(params, "filename")?,
                contents: get_str(params, "contents")?,
            })),
            _ => None,
        }
    }

    fn apply(&mut self, rewrite: &StepRewrite) -> bool {
        match (self, rewrite) {
            (Self::Run(run), StepRewrite::WillOutput(output)) if run.will_output.is_some() => {
                run.will_output = Some(output.clone());
                true
            }
            (Self::Run(run), StepRewrite::RaisesMessage(message)) => match &mut run.raises {
                Some(raises) => {
                    raises.message = Some(VersionedValue::Literal(message.clone()));
                    true
                }
                None => false,
            },
            (Self::FileContentsWillBe(step), StepRewrite::Contents(contents)) => {
                step.contents = contents.clone();
                true
            }
            _ => false,
        }
    }
}

/// Parameters of a `run` step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunStep {
    /// The code to run.
    pub code: String,
    /// The expected output template, if checked.
    pub will_output: Option<String>,
    /// The expected exception, if one should be raised.
    pub raises: Option<RaisesSpec>,
}

/// The expected exception of a `run` step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RaisesSpec {
    /// The expected exception type name. Any type matches if absent.
    pub exception_type: Option<VersionedValue>,
    /// The expected exception message. Any message matches if absent.
    pub message: Option<VersionedValue>,
}

/// Parameters of a `file-contents-will-be` step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileContentsStep {
    /// The file to read, relative to the scratch directory.
    pub filename: String,
    /// The expected contents.
    pub contents: String,
}

/// A corrected expectation for a single step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepRewrite {
    /// Replace `run.will-output`.
    WillOutput(String),
    /// Replace `run.raises.message` with a literal.
    RaisesMessage(String),
    /// Replace `file-contents-will-be.contents`.
    Contents(String),
}

impl StepRewrite {
    fn location(&self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::WillOutput(_) => (RUN_KIND, &["will-output"]),
            Self::RaisesMessage(_) => (RUN_KIND, &["raises", "message"]),
            Self::Contents(_) => (FILE_CONTENTS_KIND, &["contents"]),
        }
    }

    fn value(&self) -> &str {
        match self {
            Self::WillOutput(value) | Self::RaisesMessage(value) | Self::Contents(value) => value,
        }
    }
}

/// A loaded story file.
#[derive(Clone, Debug)]
pub struct StoryFile {
    path: Utf8PathBuf,
    document: DocumentMut,
    stories: Vec<Story>,
    dirty: bool,
}

impl StoryFile {
    /// Reads and validates a story file.
    pub fn load(path: &Utf8Path) -> Result<Self, StoryLoadError> {
        debug!("loading story file {path}");
        let contents = std::fs::read_to_string(path).map_err(|error| StoryLoadError::Read {
            path: path.to_owned(),
            error,
        })?;
        Self::parse(path, &contents)
    }

    /// Parses and validates story file contents. `path` is used for errors and [`save`](Self::save).
    pub fn parse(path: impl Into<Utf8PathBuf>, contents: &str) -> Result<Self, StoryLoadError> {
        let path = path.into();
        let document: DocumentMut = match contents.parse() {
            Ok(document) => document,
            Err(error) => return Err(StoryLoadError::Parse { path, error }),
        };

        let mut errors = Vec::new();
        for (name, item) in document.iter() {
            let story_path = join_path("", name);
            match item.as_table_like() {
                Some(table) => STORY_SCHEMA.validate(table, &story_path, &mut errors),
                None => errors.push(SchemaError::new(
                    story_path,
                    SchemaErrorKind::WrongType {
                        expected: "a story table",
                        found: item.type_name(),
                    },
                )),
            }
        }
        if !errors.is_empty() {
            return Err(StoryLoadError::Schema { path, errors });
        }

        // Every story was validated above, so the lookups below cannot miss.
        let stories = document
            .iter()
            .filter_map(|(name, item)| Some(Story::from_table(name, item.as_table_like()?)))
            .collect();

        Ok(Self {
            path,
            document,
            stories,
            dirty: false,
        })
    }

    /// The path this file was loaded from.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// The file name without its extension.
    pub fn stem(&self) -> &str {
        self.path.file_stem().unwrap_or(self.path.as_str())
    }

    /// The stories in this file, in file order.
    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    /// True if a step has been rewritten since the file was loaded or last saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replaces one expectation of one step, both in memory and in the underlying document.
    pub fn update_step(
        &mut self,
        story_index: usize,
        step_index: usize,
        rewrite: &StepRewrite,
    ) -> Result<(), StepUpdateError> {
        let error = || StepUpdateError::new(story_index, step_index);
        let story = self.stories.get_mut(story_index).ok_or_else(error)?;
        let step = story.steps.get_mut(step_index).ok_or_else(error)?;
        if !step.apply(rewrite) {
            return Err(error());
        }

        let (kind, keys) = rewrite.location();
        let steps = self
            .document
            .get_mut(&story.name)
            .and_then(|item| item.as_table_like_mut())
            .and_then(|table| table.get_mut("steps"))
            .ok_or_else(error)?;
        let step_table = table_element_mut(steps, step_index).ok_or_else(error)?;
        let mut table = step_table
            .get_mut(kind)
            .and_then(Item::as_table_like_mut)
            .ok_or_else(error)?;
        let (last, parents) = keys.split_last().ok_or_else(error)?;
        for key in parents {
            table = table
                .get_mut(key)
                .and_then(Item::as_table_like_mut)
                .ok_or_else(error)?;
        }
        match table.get_mut(last) {
            Some(item) => *item = toml_edit::value(rewrite.value()),
            None => {
                table.insert(last, toml_edit::value(rewrite.value()));
            }
        }

        info!(
            "rewrote {} of step {} in {}: {}",
            keys.join("."),
            step_index + 1,
            self.path,
            story.name,
        );
        self.dirty = true;
        Ok(())
    }

    /// Renders the document, including any rewrites.
    pub fn to_toml_string(&self) -> String {
        self.document.to_string()
    }

    /// Atomically writes the document back to its path if it has been rewritten.
    pub fn save(&mut self) -> Result<(), StorySaveError> {
        if !self.dirty {
            return Ok(());
        }
        let contents = self.document.to_string();
        atomicwrites::AtomicFile::new(&self.path, atomicwrites::AllowOverwrite)
            .write(|file| file.write_all(contents.as_bytes()))
            .map_err(|error| StorySaveError::new(self.path.clone(), error))?;
        info!("saved rewritten story file {}", self.path);
        self.dirty = false;
        Ok(())
    }
}

/// Identifies a story within a [`StoryCollection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StoryId {
    /// Index of the story file.
    pub file: usize,
    /// Index of the story within its file.
    pub story: usize,
}

/// A set of story files plus an ordered selection of stories from them.
#[derive(Clone, Debug)]
pub struct StoryCollection {
    files: Vec<StoryFile>,
    selection: Vec<StoryId>,
}

impl StoryCollection {
    /// Loads every `.story` file under `dir`, skipping hidden directories.
    ///
    /// Files are loaded in path order and every story is selected.
    pub fn discover(dir: &Utf8Path) -> Result<Self, StoryCollectionError> {
        let mut paths = Vec::new();
        let walker = walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || !entry.file_name().to_string_lossy().starts_with('.')
            });
        for entry in walker {
            let entry = entry.map_err(|error| StoryCollectionError::Discover {
                path: dir.to_owned(),
                error,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = Utf8PathBuf::from_path_buf(entry.into_path()).map_err(|path| {
                StoryCollectionError::NonUtf8Path {
                    path: path.to_string_lossy().into_owned(),
                }
            })?;
            if path.extension() == Some(STORY_EXTENSION) {
                paths.push(path);
            }
        }
        debug!("discovered {} story files under {dir}", paths.len());

        let files = paths
            .iter()
            .map(|path| StoryFile::load(path))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_files(files))
    }

    /// Creates a collection from already loaded files, selecting every story.
    pub fn from_files(files: Vec<StoryFile>) -> Self {
        let selection = files
            .iter()
            .enumerate()
            .flat_map(|(file, story_file)| {
                (0..story_file.stories.len()).map(move |story| StoryId { file, story })
            })
            .collect();
        Self { files, selection }
    }

    /// The selected stories, in run order.
    pub fn ids(&self) -> &[StoryId] {
        &self.selection
    }

    /// The number of selected stories.
    pub fn len(&self) -> usize {
        self.selection.len()
    }

    /// True if no story is selected.
    pub fn is_empty(&self) -> bool {
        self.selection.is_empty()
    }

    /// Returns a story.
    ///
    /// # Panics
    ///
    /// Panics if `id` did not come from this collection.
    pub fn story(&self, id: StoryId) -> &Story {
        &self.files[id.file].stories[id.story]
    }

    /// Returns the file containing a story.
    pub fn file(&self, id: StoryId) -> &StoryFile {
        &self.files[id.file]
    }

    /// Returns the file containing a story, mutably.
    pub fn file_mut(&mut self, id: StoryId) -> &mut StoryFile {
        &mut self.files[id.file]
    }

    /// All loaded files, including those with no selected stories.
    pub fn files(&self) -> &[StoryFile] {
        &self.files
    }

    /// A human-readable title: the file stem and the story name.
    pub fn title(&self, id: StoryId) -> String {
        format!("{} {}", self.file(id).stem(), self.story(id).name())
    }

    /// Narrows the selection to the single story whose title contains every keyword,
    /// case-insensitively.
    pub fn shortcut<S: AsRef<str>>(self, keywords: &[S]) -> Result<Self, StoryCollectionError> {
        let lowered: Vec<String> = keywords
            .iter()
            .map(|keyword| keyword.as_ref().to_lowercase())
            .collect();
        let matches: Vec<StoryId> = self
            .selection
            .iter()
            .copied()
            .filter(|&id| {
                let title = self.title(id).to_lowercase();
                lowered.iter().all(|keyword| title.contains(keyword.as_str()))
            })
            .collect();
        let keywords = keywords.iter().map(|k| k.as_ref().to_owned()).collect();
        match matches.len() {
            0 => Err(StoryCollectionError::NoMatch { keywords }),
            1 => Ok(Self {
                files: self.files,
                selection: matches,
            }),
            _ => Err(StoryCollectionError::MultipleMatches {
                keywords,
                candidates: matches.iter().map(|&id| self.title(id)).collect(),
            }),
        }
    }

    /// Narrows the selection to stories in the file with the given name, with or without the
    /// `.story` extension.
    pub fn in_filename(mut self, filename: &str) -> Result<Self, StoryCollectionError> {
        let wanted = Utf8Path::new(filename).file_name().unwrap_or(filename);
        let Some(file_index) = self.files.iter().position(|file| {
            file.path.file_name() == Some(wanted) || file.stem() == wanted
        }) else {
            return Err(StoryCollectionError::FileNotFound {
                filename: filename.to_owned(),
            });
        };
        self.selection.retain(|id| id.file == file_index);
        Ok(self)
    }

    /// Sorts the selection by story name.
    pub fn ordered_by_name(mut self) -> Self {
        let files = &self.files;
        self.selection.sort_by(|a, b| {
            let a = &files[a.file].stories[a.story];
            let b = &files[b.file].stories[b.story];
            a.name.cmp(&b.name)
        });
        self
    }

    /// Keeps only the selected stories for which `predicate` returns true.
    pub fn filter(mut self, mut predicate: impl FnMut(&Story) -> bool) -> Self {
        let files = &self.files;
        self.selection
            .retain(|id| predicate(&files[id.file].stories[id.story]));
        self
    }
}

/// Lowercases `name` and replaces every run of non-alphanumeric characters with `-`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

fn get_str(table: &dyn TableLike, key: &str) -> Option<String> {
    table.get(key)?.as_str().map(str::to_owned)
}

fn get_str_map(table: &dyn TableLike, key: &str) -> IndexMap<String, String> {
    let Some(map) = table.get(key).and_then(Item::as_table_like) else {
        return IndexMap::new();
    };
    map.iter()
        .filter_map(|(key, value)| Some((key.to_owned(), value.as_str()?.to_owned())))
        .collect()
}

fn get_versioned(table: &dyn TableLike, key: &str) -> Option<VersionedValue> {
    let item = table.get(key)?;
    if let Some(value) = item.as_str() {
        return Some(VersionedValue::Literal(value.to_owned()));
    }
    let per_version = item.as_table_like()?;
    Some(VersionedValue::PerVersion {
        legacy: per_version.get(LEGACY_KEY)?.as_str()?.to_owned(),
        current: per_version.get(CURRENT_KEY)?.as_str()?.to_owned(),
    })
}

/// The table elements of an array of tables or an inline array of inline tables.
fn table_elements(item: &Item) -> Vec<&dyn TableLike> {
    match item {
        Item::ArrayOfTables(array) => array.iter().map(|table| table as &dyn TableLike).collect(),
        Item::Value(Value::Array(array)) => array
            .iter()
            .filter_map(|value| value.as_inline_table().map(|table| table as &dyn TableLike))
            .collect(),
        _ => Vec::new(),
    }
}

fn table_element_mut(item: &mut Item, index: usize) -> Option<&mut dyn TableLike> {
    match item {
        Item::ArrayOfTables(array) => array
            .get_mut(index)
            .map(|table| table as &mut dyn TableLike),
        Item::Value(Value::Array(array)) => array
            .get_mut(index)?
            .as_inline_table_mut()
            .map(|table| table as &mut dyn TableLike),
        _ => None,
    }
}
