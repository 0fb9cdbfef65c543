//! **Staged audio** - the per-turn temporary file both audio adapters read.
//!
//! The file lives exactly as long as its `StagedAudio`: dropping it (success, early `?`, or a
//! cancelled future) deletes the file. `close` does the same but reports the deletion error.

use crate::turn::AudioClip;
use std::path::Path;
use tempfile::NamedTempFile;

pub struct StagedAudio {
    file: NamedTempFile,
    mime: String,
    file_name: String,
    len: usize,
}

impl StagedAudio {
    /// Write the clip to a fresh temporary file in the system temp dir.
    pub async fn stage(clip: &AudioClip) -> std::io::Result<Self> {
        Self::stage_in(clip, std::env::temp_dir()).await
    }

    /// Write the clip to a fresh temporary file under `dir`. Only the (empty) file is created
    /// synchronously; the bytes go through tokio's blocking pool.
    pub async fn stage_in(clip: &AudioClip, dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("wrdo-turn-")
            .suffix(&format!(".{}", clip.suffix))
            .tempfile_in(dir)?;
        tokio::fs::write(file.path(), &clip.bytes).await?;
        Ok(Self {
            file,
            mime: clip.mime_or_default().to_string(),
            file_name: format!("audio.{}", clip.suffix),
            len: clip.bytes.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Name to present in multipart uploads (`audio.<suffix>`).
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the staged bytes back (remote adapters upload them).
    pub async fn read(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.path()).await
    }

    /// Delete the file now, surfacing any error.
    pub fn close(self) -> std::io::Result<()> {
        self.file.close()
    }
}

impl std::fmt::Debug for StagedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedAudio")
            .field("path", &self.path())
            .field("mime", &self.mime)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip() -> AudioClip {
        AudioClip::new(b"RIFF....WAVE".to_vec(), Some("note.wav"), Some("audio/wav"))
    }

    #[tokio::test]
    async fn staged_file_round_trips_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedAudio::stage_in(&clip(), dir.path()).await.unwrap();
        assert!(staged.path().exists());
        assert_eq!(staged.path().extension().unwrap(), "wav");
        assert_eq!(staged.read().await.unwrap(), b"RIFF....WAVE");
        assert_eq!(staged.file_name(), "audio.wav");
        assert_eq!(staged.len(), 12);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn large_clip_stages_on_a_single_threaded_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let big = AudioClip::new(vec![7u8; 4 * 1024 * 1024], Some("long.wav"), None);
        let staged = StagedAudio::stage_in(&big, dir.path()).await.unwrap();
        assert_eq!(std::fs::metadata(staged.path()).unwrap().len(), 4 * 1024 * 1024);
        assert_eq!(staged.read().await.unwrap().len(), staged.len());
    }

    #[tokio::test]
    async fn drop_and_close_both_delete() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedAudio::stage_in(&clip(), dir.path()).await.unwrap();
        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());

        let staged = StagedAudio::stage_in(&clip(), dir.path()).await.unwrap();
        let path = staged.path().to_path_buf();
        staged.close().unwrap();
        assert!(!path.exists());
    }
}
