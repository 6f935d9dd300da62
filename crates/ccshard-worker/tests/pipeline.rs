//! Batcher → spool queue → worker → local blob store

use std::collections::HashMap;
use std::io::Read;
use std::time::Duration;

use ccshard_batcher::{BatcherMetrics, IndexChunkRef};
use ccshard_core::{ObjectStoreBlobs, RangeDownloader, SpoolQueue, StreamError};
use ccshard_worker::{
    Config, HtmlExtractor, ShardLimits, ShardWriter, TokenizeError, Tokenizer, Worker,
    WorkerMetrics,
};
use indicatif::ProgressBar;
use prometheus::Registry;
use tempfile::TempDir;

const WARC_FILE: &str = "crawl-data/CC-MAIN-2024-30/segments/1/warc/test.warc.gz";

/// Serves CDX chunks and WARC ranges from memory.
#[derive(Default)]
struct FakeCrawl {
    files: HashMap<(String, u64), Vec<u8>>,
}

impl FakeCrawl {
    fn add(&mut self, filename: &str, offset: u64, data: Vec<u8>) {
        self.files.insert((filename.to_string(), offset), data);
    }
}

impl RangeDownloader for FakeCrawl {
    fn download_and_unzip(
        &self,
        filename: &str,
        offset: u64,
        _length: u64,
    ) -> Result<Vec<u8>, StreamError> {
        self.files
            .get(&(filename.to_string(), offset))
            .cloned()
            .ok_or_else(|| StreamError::Http {
                status: Some(404),
                message: format!("{filename}@{offset}"),
            })
    }
}

struct Chars;

impl Tokenizer for Chars {
    fn encode(&self, text: &str) -> Result<Vec<u32>, TokenizeError> {
        Ok(text.chars().map(u32::from).collect())
    }
    fn name(&self) -> &str {
        "chars"
    }
    fn eos_id(&self) -> Option<u32> {
        Some(3)
    }
}

fn cdx_line(n: u64, lang: &str, status: &str) -> String {
    format!(
        r#"com,example)/{n} 20240722120756 {{"url": "https://example.com/{n}", "status": "{status}", "languages": "{lang}", "filename": "{WARC_FILE}", "offset": "{n}", "length": "321"}}"#
    )
}

fn warc_page(text: &str) -> Vec<u8> {
    let http = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n<html><body><article><p>{text}</p></article></body></html>"
    );
    let mut out = format!(
        "WARC/1.0\r\nWARC-Type: response\r\nContent-Length: {}\r\n\r\n",
        http.len()
    )
    .into_bytes();
    out.extend_from_slice(http.as_bytes());
    out.extend_from_slice(b"\r\n\r\n");
    out
}

fn tar_entries(data: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(data);
    archive
        .entries()
        .unwrap()
        .map(|e| {
            let mut e = e.unwrap();
            let name = e.path().unwrap().to_string_lossy().into_owned();
            let mut buf = Vec::new();
            e.read_to_end(&mut buf).unwrap();
            (name, buf)
        })
        .collect()
}

#[test]
fn index_to_shards() {
    let dir = TempDir::new().unwrap();
    let mut crawl = FakeCrawl::default();

    // Records 1..=5 accepted, 6 rejected (language), 7 rejected (status)
    let mut lines: Vec<String> = (1..=5).map(|n| cdx_line(n, "eng", "200")).collect();
    lines.push(cdx_line(6, "deu", "200"));
    lines.push(cdx_line(7, "eng", "404"));
    crawl.add("cdx-00000.gz", 0, format!("{}\n", lines.join("\n")).into_bytes());

    let long = "Plain words for a long enough paragraph. ".repeat(20);
    crawl.add(WARC_FILE, 1, warc_page(&long));
    crawl.add(WARC_FILE, 2, warc_page(""));
    crawl.add(WARC_FILE, 3, warc_page("too short"));
    crawl.add(WARC_FILE, 4, warc_page(&long));
    crawl.add(WARC_FILE, 5, warc_page(&long));

    // Batcher
    let queue = SpoolQueue::open(dir.path().join("spool")).unwrap();
    let batcher_metrics = BatcherMetrics::new(&Registry::new());
    let index = vec![Ok(IndexChunkRef {
        filename: "cdx-00000.gz".to_string(),
        offset: 0,
        length: 1000,
    })];
    let config = ccshard_batcher::Config {
        batch_size: 2,
        ..Default::default()
    };
    let batched = ccshard_batcher::run(
        index,
        &crawl,
        &queue,
        &config,
        &batcher_metrics,
        &ProgressBar::hidden(),
    )
    .unwrap();
    assert_eq!(batched.batch_sizes, vec![2, 2, 1]);
    assert_eq!(batcher_metrics.rejected_docs.get(), 2);
    assert_eq!(queue.pending().unwrap(), 3);

    // Worker
    let store = ObjectStoreBlobs::local(&dir.path().join("blobs")).unwrap();
    let metrics = WorkerMetrics::new(&Registry::new());
    let limits = ShardLimits {
        max_samples_per_shard: 2,
        ..Default::default()
    };
    let writer = ShardWriter::new(store.clone(), "cc/gpt2/", limits, metrics.clone());
    let worker = Worker::new(
        &crawl,
        HtmlExtractor::new(),
        Chars,
        writer,
        metrics.clone(),
        Config::default(),
    );
    let mut consumer = queue.consumer(Duration::from_millis(10), true);
    let summary = ccshard_worker::run(worker, &mut consumer, &ProgressBar::hidden()).unwrap();

    assert_eq!(summary.consumed.batches, 3);
    assert_eq!(summary.consumed.processed, 3);
    assert_eq!(summary.consumed.no_text, 1);
    assert_eq!(summary.consumed.invalid_length, 1);
    assert_eq!(queue.pending().unwrap(), 0);
    assert_eq!(metrics.batches.get(), 3);

    // Three samples at two per shard: one full shard plus the flushed one
    let keys = store.list("cc/gpt2").unwrap();
    assert_eq!(keys.len(), 2);
    let mut samples = 0;
    for key in &keys {
        assert!(key.starts_with("cc/gpt2/data_"));
        let entries = tar_entries(&store.get(key).unwrap());
        for pair in entries.chunks(2) {
            let (tokens_name, tokens) = &pair[0];
            let (meta_name, meta) = &pair[1];
            assert!(tokens_name.ends_with(".tokens.npy"));
            assert!(meta_name.ends_with(".meta.json"));

            let meta: serde_json::Value = serde_json::from_slice(meta).unwrap();
            assert_eq!(meta["crawl"], WARC_FILE);
            assert_eq!(meta["tokenizer"]["name"], "chars");
            assert_eq!(meta["lang"], "en");
            assert_eq!(meta["length"], 321);

            let ids = npyz::NpyFile::new(&tokens[..])
                .unwrap()
                .into_vec::<u32>()
                .unwrap();
            assert_eq!(ids.len() as u64, meta["num_tokens"].as_u64().unwrap());
            let text: String = ids.iter().filter_map(|&c| char::from_u32(c)).collect();
            assert_eq!(text, long.trim());
            samples += 1;
        }
    }
    assert_eq!(samples, 3);
}
