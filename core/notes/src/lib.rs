//! Notes on top of the active vault.
//!
//! Each note is one Markdown file with a small front-matter header under
//! `/notes` in the vault's drive. Every write also queues a mirror of the
//! notes folder to the local filesystem.

pub mod export;
pub mod mirror;
pub mod serialization;
pub mod store;

pub use export::{expand_home, resolve_user_dir, ExportPaths, EXPORT_SUBDIR, NOTES_SUBDIR};
pub use mirror::{MirrorCompletion, NotesMirror};
pub use serialization::{parse_note, serialize_note, Note, ParsedNote};
pub use store::{NoteDraft, NoteSummary, NoteUpdate, NotesStore};

/// Drive directory holding the notes.
pub const NOTES_DIR: &str = "/notes";
/// File extension of note files.
pub const NOTE_EXTENSION: &str = ".md";
/// Length of the body excerpt in listings, in characters.
pub const SUMMARY_CHARS: usize = 120;
/// Listing title for notes without one.
pub const UNTITLED: &str = "(Untitled)";
