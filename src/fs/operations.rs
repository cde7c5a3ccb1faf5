use std::{future::Future, io::ErrorKind, path::Path};

use fs4::tokio::AsyncFileExt;
use tokio::{
    fs::File,
    io::{self, AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};

/// Reads the whole file under a shared lock. A missing or empty file reads as `None`.
pub async fn read_locked(path: &Path) -> Result<Option<Vec<u8>>, io::Error> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    file.lock_shared()?;
    let mut contents = Vec::new();
    let result = file.read_to_end(&mut contents).await;
    file.unlock_async().await?;
    result?;

    Ok((!contents.is_empty()).then_some(contents))
}

/// Read-modify-write cycle under an exclusive lock. `update` receives the current contents
/// (`None` when the file is new or empty) and returns the bytes to store plus a value handed back
/// to the caller. Nothing is written if `update` fails.
pub async fn update_locked<T, E, F, Fut>(path: &Path, update: F) -> Result<T, E>
where
    E: From<io::Error>,
    F: FnOnce(Option<Vec<u8>>) -> Fut,
    Fut: Future<Output = Result<(Vec<u8>, T), E>>,
{
    let mut file = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .await?;

    // Semi-safe acquire-release for a file
    file.lock_exclusive()?;
    let result = rewrite(&mut file, update).await;
    file.unlock_async().await?;
    result
}

async fn rewrite<T, E, F, Fut>(file: &mut File, update: F) -> Result<T, E>
where
    E: From<io::Error>,
    F: FnOnce(Option<Vec<u8>>) -> Fut,
    Fut: Future<Output = Result<(Vec<u8>, T), E>>,
{
    let mut contents = Vec::new();
    file.read_to_end(&mut contents).await?;
    let current = (!contents.is_empty()).then_some(contents);

    let (next, value) = update(current).await?;

    file.rewind().await?;
    file.set_len(0).await?;
    file.write_all(&next).await?;
    file.flush().await?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::{read_locked, update_locked};

    #[tokio::test]
    async fn test_read_missing_file() -> Result<()> {
        let dir = tempdir()?;
        assert_eq!(read_locked(&dir.path().join("absent.json")).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_update_sees_previous_contents() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("doc");

        let seen = update_locked(&path, |current| async move {
            Ok::<_, std::io::Error>((b"a much longer first value".to_vec(), current))
        })
        .await?;
        assert_eq!(seen, None);

        let seen = update_locked(&path, |current| async move {
            Ok::<_, std::io::Error>((b"short".to_vec(), current))
        })
        .await?;
        assert_eq!(seen.as_deref(), Some(&b"a much longer first value"[..]));

        // Shorter rewrite must not leave a tail of the previous contents behind.
        assert_eq!(read_locked(&path).await?.as_deref(), Some(&b"short"[..]));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_update_keeps_file() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("doc");
        update_locked(&path, |_| async { Ok::<_, std::io::Error>((b"kept".to_vec(), ())) })
            .await?;

        let result = update_locked(&path, |_| async {
            Err::<(Vec<u8>, ()), _>(std::io::Error::other("refused"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(read_locked(&path).await?.as_deref(), Some(&b"kept"[..]));
        Ok(())
    }
}
