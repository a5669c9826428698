use async_trait::async_trait;
use isolate_client::ObjectSink;
use isolate_core::ContentId;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Collects downloaded objects in memory, keyed by destination.
#[derive(Default)]
pub struct MemorySink {
    objects: Mutex<BTreeMap<PathBuf, Vec<u8>>>,
}

#[allow(dead_code)]
impl MemorySink {
    pub fn get(&self, destination: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(destination.as_ref()).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl ObjectSink for MemorySink {
    async fn write(
        &self,
        _id: &ContentId,
        destination: &Path,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> io::Result<u64> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;
        let written = data.len() as u64;
        self.objects
            .lock()
            .unwrap()
            .insert(destination.to_path_buf(), data);
        Ok(written)
    }

    async fn discard(&self, destination: &Path) -> io::Result<()> {
        self.objects.lock().unwrap().remove(destination);
        Ok(())
    }
}
