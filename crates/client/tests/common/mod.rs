pub mod fake;
pub mod sink;

#[allow(unused_imports)]
pub use fake::{BASE, Body, FakeTransport, Reply, TOKEN_QUERY};
#[allow(unused_imports)]
pub use sink::MemorySink;

use isolate_client::IsolateClient;
use isolate_core::compression::compress_reader;
use isolate_core::{ClientConfig, Codec, CompressionLevel};
use std::sync::Arc;

/// A client for `BASE` over `transport`, with a small worker pool.
#[allow(dead_code)]
pub fn client_with(transport: &Arc<FakeTransport>, config: ClientConfig) -> Arc<IsolateClient> {
    Arc::new(IsolateClient::new(config, transport.clone()).unwrap())
}

#[allow(dead_code)]
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::for_server(BASE);
    config.workers = 4;
    config.retry.initial_delay_ms = 1;
    config
}

/// Deflate `data` the way uploads do for unnamed content.
#[allow(dead_code)]
pub async fn deflate(data: &[u8]) -> Vec<u8> {
    let mut reader = data;
    compress_reader(&mut reader, Codec::Deflate, CompressionLevel::DEFAULT)
        .await
        .unwrap()
        .to_vec()
}

/// Bytes that zlib cannot shrink much.
#[allow(dead_code)]
pub fn noise(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x2545_f491;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect()
}
