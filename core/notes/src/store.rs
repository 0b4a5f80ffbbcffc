//! Note CRUD on the active vault's drive.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::mirror::NotesMirror;
use crate::serialization::{now, parse_note, serialize_note, Note};
use crate::{NOTES_DIR, NOTE_EXTENSION, SUMMARY_CHARS, UNTITLED};
use pearl_common::{with_deadline, Deadline, DrivePath, Error, Result};
use pearl_storage::Drive;
use pearl_vault::VaultIdentity;

const ID_ATTEMPTS: usize = 5;

type IdSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Listing row for a note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteSummary {
    pub id: String,
    pub title: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    /// First characters of the body.
    pub summary: String,
}

/// Fields for a new note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// Fields to change on an existing note; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub body: Option<String>,
}

/// Notes stored as `/notes/<id>.md` in the active drive.
///
/// Concurrent writes to one note are last-write-wins.
pub struct NotesStore {
    identity: Arc<VaultIdentity>,
    mirror: NotesMirror,
    download_timeout: Duration,
    id_source: IdSource,
}

fn notes_dir() -> Result<DrivePath> {
    DrivePath::parse(NOTES_DIR)
}

fn note_path(id: &str) -> Result<DrivePath> {
    let id = id.trim();
    if id.is_empty() {
        return Err(Error::Validation("Note id cannot be empty".to_string()));
    }
    notes_dir()?.join(&format!("{}{}", id, NOTE_EXTENSION))
}

fn summarize(body: &str) -> String {
    body.chars().take(SUMMARY_CHARS).collect()
}

impl NotesStore {
    pub fn new(identity: Arc<VaultIdentity>, mirror: NotesMirror, download_timeout: Duration) -> Self {
        Self {
            identity,
            mirror,
            download_timeout,
            id_source: Arc::new(|| pearl_crypto::random_id(pearl_crypto::DEFAULT_ID_BYTES)),
        }
    }

    /// Replace the generator used for new note ids.
    pub fn with_id_source(mut self, source: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_source = Arc::new(source);
        self
    }

    pub fn mirror(&self) -> &NotesMirror {
        &self.mirror
    }

    async fn drive(&self) -> Result<Arc<dyn Drive>> {
        Ok(self.identity.ensure_drive().await?.drive)
    }

    /// Bounded best-effort fetch; a missing file or a timeout is not an error.
    async fn download(&self, drive: &dyn Drive, path: &DrivePath) -> Result<()> {
        match with_deadline(self.download_timeout, drive.download(path)).await {
            Deadline::Completed(Ok(())) => Ok(()),
            Deadline::Completed(Err(e)) if e.is_not_found() || e.is_timeout() => Ok(()),
            Deadline::Completed(Err(e)) => Err(e),
            Deadline::TimedOut => {
                debug!("Download of {} still pending after {:?}", path, self.download_timeout);
                Ok(())
            }
        }
    }

    async fn read_text(&self, drive: &dyn Drive, path: &DrivePath) -> Result<String> {
        self.download(drive, path).await?;
        let data = drive
            .get(path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Note not found: {}", path)))?;
        String::from_utf8(data)
            .map_err(|e| Error::Serialization(format!("Note {} is not UTF-8: {}", path, e)))
    }

    async fn note_file_names(&self, drive: &dyn Drive) -> Result<Vec<String>> {
        let entries = match drive.list(&notes_dir()?, false).await {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(entries
            .into_iter()
            .filter_map(|entry| entry.path.name().map(str::to_string))
            .filter(|name| name.ends_with(NOTE_EXTENSION))
            .collect())
    }

    async fn allocate_id(&self, drive: &dyn Drive) -> Result<(String, DrivePath)> {
        for _ in 0..ID_ATTEMPTS {
            let id = (self.id_source)();
            let path = note_path(&id)?;
            // An unreadable entry counts as free.
            if !matches!(drive.entry(&path).await, Ok(Some(_))) {
                return Ok((id, path));
            }
        }

        let noise = pearl_crypto::random_bytes(2);
        let id = format!(
            "{:x}{:04x}",
            chrono::Utc::now().timestamp_millis(),
            u16::from_be_bytes([noise[0], noise[1]])
        );
        warn!("Note id collisions exhausted retries, using {}", id);
        let path = note_path(&id)?;
        Ok((id, path))
    }

    /// All readable notes, newest update first.
    ///
    /// Never fails: while the vault is still syncing an empty list is
    /// indistinguishable from an empty vault. Unreadable notes are skipped.
    pub async fn list_notes(&self) -> Vec<NoteSummary> {
        match self.try_list_notes().await {
            Ok(notes) => notes,
            Err(e) => {
                warn!("Failed to list notes, returning empty list: {}", e);
                Vec::new()
            }
        }
    }

    async fn try_list_notes(&self) -> Result<Vec<NoteSummary>> {
        let drive = self.drive().await?;
        let names = self.note_file_names(drive.as_ref()).await?;
        if names.is_empty() {
            debug!("No notes found in vault");
            return Ok(Vec::new());
        }

        let mut notes = Vec::with_capacity(names.len());
        let mut failed = 0usize;
        for name in names {
            let stem = name.strip_suffix(NOTE_EXTENSION).unwrap_or(&name).to_string();
            let loaded = match note_path(&stem) {
                Ok(path) => self.read_text(drive.as_ref(), &path).await,
                Err(e) => Err(e),
            };
            match loaded {
                Ok(raw) => {
                    let parsed = parse_note(&raw);
                    notes.push(NoteSummary {
                        id: parsed.id.unwrap_or(stem),
                        title: if parsed.title.is_empty() {
                            UNTITLED.to_string()
                        } else {
                            parsed.title
                        },
                        created_at: parsed.created_at,
                        updated_at: parsed.updated_at,
                        summary: summarize(&parsed.body),
                    });
                }
                Err(e) => {
                    warn!("Failed to load note {}: {}", name, e);
                    failed += 1;
                }
            }
        }

        notes.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        info!(
            "Loaded {} notes{}",
            notes.len(),
            if failed > 0 {
                format!(" ({} failed)", failed)
            } else {
                String::new()
            }
        );
        Ok(notes)
    }

    /// Read one note.
    ///
    /// # Errors
    /// - `Error::NotFound` if no such note exists after a bounded fetch
    pub async fn read_note(&self, id: &str) -> Result<Note> {
        let drive = self.drive().await?;
        let raw = self.read_text(drive.as_ref(), &note_path(id)?).await?;
        let parsed = parse_note(&raw);
        Ok(Note {
            id: parsed.id.unwrap_or_else(|| id.trim().to_string()),
            title: parsed.title,
            body: parsed.body,
            created_at: parsed.created_at,
            updated_at: parsed.updated_at,
        })
    }

    /// Create a note with a fresh id.
    pub async fn create_note(&self, draft: NoteDraft) -> Result<Note> {
        let drive = self.drive().await?;
        let (id, path) = self.allocate_id(drive.as_ref()).await?;
        let ts = now();
        let note = Note {
            id,
            title: draft.title,
            body: draft.body,
            created_at: Some(ts),
            updated_at: Some(ts),
        };

        drive.put(&path, serialize_note(&note).into_bytes()).await?;
        debug!("Created note {}", note.id);
        let _ = self.mirror.queue(drive);
        Ok(note)
    }

    /// Merge `update` into an existing note.
    ///
    /// `created_at` is kept (or set now if it was missing) and
    /// `updated_at` is set to now.
    ///
    /// # Errors
    /// - `Error::NotFound` if the note does not exist
    pub async fn update_note(&self, id: &str, update: NoteUpdate) -> Result<Note> {
        let existing = self.read_note(id).await?;
        let drive = self.drive().await?;
        let ts = now();
        let id = id.trim().to_string();
        let updated = Note {
            title: update.title.unwrap_or(existing.title),
            body: update.body.unwrap_or(existing.body),
            created_at: existing.created_at.or(Some(ts)),
            updated_at: Some(ts),
            id,
        };

        drive
            .put(&note_path(&updated.id)?, serialize_note(&updated).into_bytes())
            .await?;
        debug!("Updated note {}", updated.id);
        let _ = self.mirror.queue(drive);
        Ok(updated)
    }

    /// Delete a note. Deleting a missing note succeeds.
    pub async fn delete_note(&self, id: &str) -> Result<()> {
        let drive = self.drive().await?;
        let path = note_path(id)?;
        self.download(drive.as_ref(), &path).await?;
        match drive.del(&path).await {
            Ok(()) => debug!("Deleted note {}", id),
            Err(e) if e.is_not_found() => debug!("Note {} already absent", id),
            Err(e) => return Err(e),
        }
        let _ = self.mirror.queue(drive);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::ExportPaths;
    use pearl_common::Timeouts;
    use pearl_storage::{MemoryDriveStore, MemorySwarm};
    use pearl_vault::{DriveLifecycleManager, DriveSession, MemoryKeyValueStore};
    use std::collections::HashSet;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        store: NotesStore,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let session = Arc::new(DriveSession::new(
            Arc::new(MemoryDriveStore::new()),
            Arc::new(MemorySwarm::new()).factory(),
            Timeouts::default(),
        ));
        let lifecycle = Arc::new(DriveLifecycleManager::new(session));
        let identity = Arc::new(VaultIdentity::new(
            Arc::new(MemoryKeyValueStore::new()),
            lifecycle,
        ));
        let mirror = NotesMirror::new(ExportPaths::from_base(temp.path()));
        Fixture {
            store: NotesStore::new(identity, mirror, Duration::from_secs(10)),
            _temp: temp,
        }
    }

    fn draft(title: &str, body: &str) -> NoteDraft {
        NoteDraft {
            title: title.to_string(),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let f = fixture();

        let created = f.store.create_note(draft("A", "b")).await.unwrap();
        assert_eq!(created.id.len(), 32);

        let listed = f.store.list_notes().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "A");
        assert_eq!(listed[0].id, created.id);

        tokio::time::sleep(Duration::from_millis(5)).await;
        let updated = f
            .store
            .update_note(
                &created.id,
                NoteUpdate {
                    body: Some("c".to_string()),
                    ..NoteUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.title, "A");

        let read = f.store.read_note(&created.id).await.unwrap();
        assert_eq!(read.body, "c");
        assert_eq!(read.created_at, created.created_at);
        assert_ne!(read.updated_at, created.updated_at);

        f.store.delete_note(&created.id).await.unwrap();
        assert!(f.store.list_notes().await.is_empty());
        // Idempotent.
        f.store.delete_note(&created.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_note_is_not_found() {
        let f = fixture();
        assert!(f.store.read_note("nope").await.unwrap_err().is_not_found());
        assert!(f
            .store
            .update_note("nope", NoteUpdate::default())
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_ids_do_not_collide() {
        let f = fixture();
        let mut ids = HashSet::new();
        for i in 0..5 {
            let note = f.store.create_note(draft(&format!("n{}", i), "")).await.unwrap();
            assert!(ids.insert(note.id));
        }
        assert_eq!(f.store.list_notes().await.len(), 5);
    }

    #[tokio::test]
    async fn test_exhausted_id_retries_fall_back_to_timestamp() {
        let temp = TempDir::new().unwrap();
        let f = fixture();
        let store = NotesStore::new(
            f.store.identity.clone(),
            NotesMirror::new(ExportPaths::from_base(temp.path())),
            Duration::from_secs(10),
        )
        .with_id_source(|| "taken".to_string());

        let first = store.create_note(draft("first", "")).await.unwrap();
        assert_eq!(first.id, "taken");

        let before = chrono::Utc::now().timestamp_millis();
        let second = store.create_note(draft("second", "")).await.unwrap();
        let after = chrono::Utc::now().timestamp_millis();

        assert_ne!(second.id, "taken");
        assert!(second.id.bytes().all(|b| b.is_ascii_hexdigit()));
        let (millis, noise) = second.id.split_at(second.id.len() - 4);
        assert_eq!(noise.len(), 4);
        let millis = i64::from_str_radix(millis, 16).unwrap();
        assert!(before <= millis && millis <= after);

        assert_eq!(store.read_note("taken").await.unwrap().title, "first");
        assert_eq!(store.read_note(&second.id).await.unwrap().title, "second");
        assert_eq!(store.list_notes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_listing_order_fallbacks_and_bad_files() {
        let f = fixture();
        let older = f.store.create_note(draft("", "x".repeat(300).as_str())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let newer = f.store.create_note(draft("Newer", "short")).await.unwrap();

        let drive = f.store.drive().await.unwrap();
        // Plain body without front matter; id comes from the file name.
        drive
            .put(&note_path("bare").unwrap(), b"no header here".to_vec())
            .await
            .unwrap();
        // Not UTF-8: skipped.
        drive
            .put(&note_path("broken").unwrap(), vec![0xff, 0xfe, 0x00])
            .await
            .unwrap();
        // Not a note file.
        drive
            .put(&notes_dir().unwrap().join("readme.txt").unwrap(), b"hi".to_vec())
            .await
            .unwrap();

        let listed = f.store.list_notes().await;
        let ids: Vec<_> = listed.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec![newer.id.as_str(), older.id.as_str(), "bare"]);
        assert_eq!(listed[1].title, UNTITLED);
        assert_eq!(listed[1].summary.chars().count(), SUMMARY_CHARS);
        assert_eq!(listed[2].summary, "no header here");
    }

    #[tokio::test]
    async fn test_writes_reach_the_mirror() {
        let f = fixture();
        let note = f.store.create_note(draft("M", "mirrored")).await.unwrap();
        f.store.mirror().export_all(None).await;

        let exported = f
            .store
            .mirror()
            .paths()
            .notes_root
            .join(format!("{}.md", note.id));
        let text = std::fs::read_to_string(exported).unwrap();
        assert!(text.ends_with("\n\nmirrored"));
    }

    #[test]
    fn test_note_path_rejects_bad_ids() {
        assert!(note_path("").is_err());
        assert!(note_path("a/b").is_err());
        assert_eq!(note_path("abc").unwrap().to_string(), "/notes/abc.md");
    }
}
