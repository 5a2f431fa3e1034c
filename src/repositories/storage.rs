use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail};
use uuid::Uuid;

/// Extensions accepted for shared files, with the MIME types each may carry.
const ALLOWED_TYPES: [(&str, &[&str]); 10] = [
    ("jpeg", &["image/jpeg"]),
    ("jpg", &["image/jpeg"]),
    ("png", &["image/png"]),
    ("gif", &["image/gif"]),
    ("pdf", &["application/pdf"]),
    ("doc", &["application/msword"]),
    (
        "docx",
        &["application/vnd.openxmlformats-officedocument.wordprocessingml.document"],
    ),
    ("txt", &["text/plain"]),
    ("mp4", &["video/mp4"]),
    ("mp3", &["audio/mpeg", "audio/mp3"]),
];

const IMAGE_EXTENSIONS: [&str; 6] = ["jpeg", "jpg", "png", "gif", "webp", "avif"];

#[derive(Clone, Debug, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

/// Local object store rooted at a directory and published under
/// `<public_base_url>/uploads/`.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
    public_url: String,
}

impl FileStore {
    pub async fn new(root: &str, public_base_url: &str) -> Result<Self, anyhow::Error> {
        let root = PathBuf::from(root);
        tokio::fs::create_dir_all(&root).await?;

        Ok(Self {
            root,
            public_url: format!("{}/uploads", public_base_url.trim_end_matches('/')),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key)
    }

    /// Inverse of [`FileStore::url_for`].
    pub fn key_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_url)
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }

    pub async fn put(
        &self,
        prefix: &str,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredObject, anyhow::Error> {
        let extension = extension(original_name).unwrap_or_else(|| "bin".to_string());
        let key = format!("{}/{}.{}", prefix, Uuid::new_v4().simple(), extension);
        let path = self.resolve(&key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        Ok(StoredObject {
            url: self.url_for(&key),
            key,
        })
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>, anyhow::Error> {
        let path = self.resolve(key)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| anyhow!("Could not read {}: {}", key, e))?;

        Ok(bytes)
    }

    /// Removing a missing object is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf, anyhow::Error> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if key.is_empty() || !safe {
            bail!("Invalid storage key {:?}", key)
        }

        Ok(self.root.join(relative))
    }
}

pub fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
}

/// Both the extension and the declared MIME type must be on the allow list
/// and agree with each other.
pub fn check_shared_file(name: &str, mimetype: &str) -> Result<(), String> {
    let ext = extension(name).ok_or_else(|| "Invalid file type".to_string())?;
    let mimetype = mimetype.trim().to_ascii_lowercase();

    let allowed = ALLOWED_TYPES
        .iter()
        .find(|(allowed_ext, _)| *allowed_ext == ext)
        .map(|(_, mimes)| mimes.contains(&mimetype.as_str()))
        .unwrap_or(false);

    if allowed {
        Ok(())
    } else {
        Err("Invalid file type".to_string())
    }
}

pub fn check_image(name: &str, mimetype: &str) -> Result<(), String> {
    let is_image_ext = extension(name)
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false);
    if !is_image_ext || !mimetype.trim().to_ascii_lowercase().starts_with("image/") {
        return Err(format!("{} is not an image", name));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_files_need_matching_extension_and_mime() {
        assert!(check_shared_file("photo.JPG", "image/jpeg").is_ok());
        assert!(check_shared_file("notes.txt", "text/plain").is_ok());
        assert!(check_shared_file("song.mp3", "audio/mpeg").is_ok());

        assert!(check_shared_file("photo.jpg", "application/pdf").is_err());
        assert!(check_shared_file("script.sh", "text/plain").is_err());
        assert!(check_shared_file("README", "text/plain").is_err());
    }

    #[test]
    fn images_are_checked_by_extension_and_mime() {
        assert!(check_image("front.png", "image/png").is_ok());
        assert!(check_image("front.png", "text/html").is_err());
        assert!(check_image("front.pdf", "image/png").is_err());
    }

    #[tokio::test]
    async fn objects_round_trip_through_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_str().unwrap(), "http://localhost:5000/")
            .await
            .unwrap();

        let object = store.put("post-files", "drill.png", b"png-bytes").await.unwrap();
        assert!(object.key.starts_with("post-files/"));
        assert!(object.key.ends_with(".png"));
        assert_eq!(object.url, format!("http://localhost:5000/uploads/{}", object.key));
        assert_eq!(store.key_for_url(&object.url), Some(object.key.clone()));

        assert_eq!(store.get(&object.key).await.unwrap(), b"png-bytes");
        store.delete(&object.key).await.unwrap();
        assert!(store.get(&object.key).await.is_err());
        store.delete(&object.key).await.unwrap();
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().to_str().unwrap(), "http://localhost")
            .await
            .unwrap();

        assert!(store.get("../secret").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
        assert_eq!(store.key_for_url("https://elsewhere/uploads/x.png"), None);
    }
}
