//! `multipart/form-data` bodies for blobstore uploads.

use bytes::{BufMut, Bytes, BytesMut};

/// A file part of a multipart body.
pub struct FilePart<'a> {
    pub field: &'a str,
    pub filename: &'a str,
    pub data: &'a [u8],
}

/// Encode text fields followed by one file part.
///
/// Returns the `Content-Type` header value (carrying the boundary) and the body.
pub fn encode_multipart(fields: &[(&str, &str)], file: FilePart<'_>) -> (String, Bytes) {
    let boundary = format!("----isolate-{}", uuid::Uuid::new_v4().simple());
    encode_with_boundary(&boundary, fields, file)
}

fn encode_with_boundary(
    boundary: &str,
    fields: &[(&str, &str)],
    file: FilePart<'_>,
) -> (String, Bytes) {
    let mut body = BytesMut::with_capacity(file.data.len() + 256 * (fields.len() + 1));

    for (name, value) in fields {
        body.put_slice(format!("--{boundary}\r\n").as_bytes());
        body.put_slice(format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes());
        body.put_slice(value.as_bytes());
        body.put_slice(b"\r\n");
    }

    body.put_slice(format!("--{boundary}\r\n").as_bytes());
    body.put_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            file.field, file.filename
        )
        .as_bytes(),
    );
    body.put_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.put_slice(file.data);
    body.put_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    (
        format!("multipart/form-data; boundary={boundary}"),
        body.freeze(),
    )
}
