//! Dataset export
//!
//! ```text
//! sink ← sha256 tee ← gzip ← tar
//!                             ├─ <unixDay>/<alg>/<hex>   blob bytes
//!                             └─ labels                  "<external key> <labels>" per blob
//! ```
//!
//! Returns the digest of the compressed stream as written to the sink.

use crate::blob::{unix_day, Digest, Info, SHA256};
use crate::storage::engine::Provider;
use crate::storage::error::StorageResult;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest as _, Sha256};
use std::io::{self, Write};

const LABELS_ENTRY: &str = "labels";
const ENTRY_MODE: u32 = 0o644;

/// Writes through to `inner` while hashing everything written
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Tar path of a blob inside an export
pub fn export_path(info: &Info) -> String {
    let r = &info.blob_ref;
    format!("{}/{}/{}", unix_day(r.time_range.from), r.alg, r.hex)
}

/// Stream `infos` and a trailing labels file as a gzip-compressed tar
pub async fn export_dataset<W>(
    provider: &dyn Provider,
    infos: &[Info],
    sink: W,
) -> StorageResult<Digest>
where
    W: Write + Send,
{
    let tee = HashingWriter {
        inner: sink,
        hasher: Sha256::new(),
    };
    let mut builder = tar::Builder::new(GzEncoder::new(tee, Compression::default()));
    let mut labels = String::new();

    for info in infos {
        let reader = provider.reader_at(&info.blob_ref).await?;
        let size = reader.size();

        let mut header = tar::Header::new_gnu();
        header.set_size(size);
        header.set_mode(ENTRY_MODE);
        header.set_mtime((info.blob_ref.time_range.from / 1000).max(0) as u64);
        header.set_cksum();
        builder.append_data(&mut header, export_path(info), reader.section(0, size))?;

        labels.push_str(&format!("{} {}\n", info.external_key(), info.labels));
    }

    let mut header = tar::Header::new_gnu();
    header.set_size(labels.len() as u64);
    header.set_mode(ENTRY_MODE);
    header.set_cksum();
    builder.append_data(&mut header, LABELS_ENTRY, labels.as_bytes())?;

    let mut tee = builder.into_inner()?.finish()?;
    tee.flush()?;

    tracing::info!(blobs = infos.len(), "Exported dataset");
    Ok(Digest::new(SHA256, hex::encode(tee.hasher.finalize())))
}
