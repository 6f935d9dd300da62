//! Sample payloads: `.npy` token array and metadata JSON

use std::io;

use ccshard_core::RecordLocation;
use npyz::{DType, TypeStr, WriterBuilder};
use serde::Serialize;

use crate::tokenize::Tokenizer;

pub const SOURCE: &str = "commoncrawl";
pub const LANG: &str = "en";

/// One tokenized document, ready for the shard writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// `.npy` bytes of a 1-D little-endian uint32 array
    pub tokens: Vec<u8>,
    /// UTF-8 JSON metadata
    pub meta: Vec<u8>,
}

#[derive(Debug, Serialize)]
pub struct TokenizerInfo<'a> {
    pub name: &'a str,
    pub eos_id: Option<u32>,
}

/// Metadata stored next to each token array. Field order is part of the
/// output format.
#[derive(Debug, Serialize)]
pub struct SampleMeta<'a> {
    pub tokenizer: TokenizerInfo<'a>,
    pub num_tokens: usize,
    pub source: &'a str,
    pub crawl: &'a str,
    pub offset: u64,
    pub length: u64,
    pub lang: &'a str,
}

/// Encode token ids as a `<u4` NumPy array.
pub fn encode_tokens(ids: &[u32]) -> io::Result<Vec<u8>> {
    let type_str: TypeStr = "<u4"
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{e}")))?;
    let mut out = Vec::with_capacity(128 + ids.len() * 4);
    let mut writer: npyz::NpyWriter<u32, _> = npyz::WriteOptions::new()
        .dtype(DType::Plain(type_str))
        .shape(&[ids.len() as u64])
        .writer(&mut out)
        .begin_nd()?;
    writer.extend(ids.iter().copied())?;
    writer.finish()?;
    Ok(out)
}

/// Build both payloads for a document at `location`.
pub fn build_sample<T: Tokenizer + ?Sized>(
    ids: &[u32],
    tokenizer: &T,
    location: &RecordLocation,
) -> io::Result<Sample> {
    let tokens = encode_tokens(ids)?;
    let meta = SampleMeta {
        tokenizer: TokenizerInfo {
            name: tokenizer.name(),
            eos_id: tokenizer.eos_id(),
        },
        num_tokens: ids.len(),
        source: SOURCE,
        crawl: &location.filename,
        offset: location.offset,
        length: location.length,
        lang: LANG,
    };
    let meta = serde_json::to_vec(&meta)?;
    Ok(Sample { tokens, meta })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::TokenizeError;

    struct Named;

    impl Tokenizer for Named {
        fn encode(&self, _text: &str) -> Result<Vec<u32>, TokenizeError> {
            Ok(Vec::new())
        }
        fn name(&self) -> &str {
            "gpt2"
        }
        fn eos_id(&self) -> Option<u32> {
            Some(50256)
        }
    }

    fn location() -> RecordLocation {
        RecordLocation {
            filename: "crawl-data/CC-MAIN-2024-30/segments/x/warc/y.warc.gz".to_string(),
            offset: 1234,
            length: 5678,
        }
    }

    #[test]
    fn npy_is_little_endian_u32() {
        let ids = [0u32, 1, 50256, u32::MAX];
        let bytes = encode_tokens(&ids).unwrap();
        assert!(bytes.starts_with(b"\x93NUMPY"));

        let npy = npyz::NpyFile::new(&bytes[..]).unwrap();
        assert_eq!(npy.shape(), &[4u64]);
        assert_eq!(npy.dtype(), DType::Plain("<u4".parse().unwrap()));
        assert_eq!(npy.into_vec::<u32>().unwrap(), ids);
        assert_eq!(&bytes[bytes.len() - 4..], &u32::MAX.to_le_bytes());
        assert_eq!(&bytes[bytes.len() - 8..bytes.len() - 4], &50256u32.to_le_bytes());
    }

    #[test]
    fn empty_token_array() {
        let bytes = encode_tokens(&[]).unwrap();
        let npy = npyz::NpyFile::new(&bytes[..]).unwrap();
        assert!(npy.into_vec::<u32>().unwrap().is_empty());
    }

    #[test]
    fn meta_json_shape_and_order() {
        let sample = build_sample(&[5, 6, 7], &Named, &location()).unwrap();
        let text = String::from_utf8(sample.meta).unwrap();
        assert_eq!(
            text,
            r#"{"tokenizer":{"name":"gpt2","eos_id":50256},"num_tokens":3,"source":"commoncrawl","crawl":"crawl-data/CC-MAIN-2024-30/segments/x/warc/y.warc.gz","offset":1234,"length":5678,"lang":"en"}"#
        );
    }
}
