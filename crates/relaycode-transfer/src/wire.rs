//! The binary tagged-message protocol carried over the data channel.
//! Every frame is a tag byte followed by a type-specific payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::TransferError;
use crate::types::{FileInfo, QueueInfo};

pub const TAG_FILE_INFO: u8 = 0x01;
pub const TAG_FILE_CHUNK: u8 = 0x02;
pub const TAG_FILE_COMPLETE: u8 = 0x03;
pub const TAG_FILE_ACCEPT: u8 = 0x04;
pub const TAG_FILE_REJECT: u8 = 0x05;
/// Reserved in the wire format; never emitted or accepted.
pub const TAG_PROGRESS: u8 = 0x10;
pub const TAG_ENCRYPTION_KEY: u8 = 0x20;
pub const TAG_QUEUE_INFO: u8 = 0x21;

#[derive(Debug, Clone)]
pub enum Frame {
    FileInfo(FileInfo),
    FileChunk {
        chunk_index: u32,
        file_id: String,
        iv: Vec<u8>,
        ciphertext: Bytes,
    },
    FileComplete,
    FileAccept,
    FileReject,
    EncryptionKey([u8; 32]),
    QueueInfo(QueueInfo),
}

impl Frame {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        match self {
            Frame::FileInfo(info) => {
                buf.put_u8(TAG_FILE_INFO);
                buf.put_slice(&serde_json::to_vec(info).expect("FileInfo always serializes"));
            }
            Frame::FileChunk {
                chunk_index,
                file_id,
                iv,
                ciphertext,
            } => {
                buf.put_u8(TAG_FILE_CHUNK);
                buf.put_u32(*chunk_index);
                let id_bytes = file_id.as_bytes();
                buf.put_u8(id_bytes.len() as u8);
                buf.put_slice(id_bytes);
                buf.put_u8(iv.len() as u8);
                buf.put_slice(iv);
                buf.put_slice(ciphertext);
            }
            Frame::FileComplete => buf.put_u8(TAG_FILE_COMPLETE),
            Frame::FileAccept => buf.put_u8(TAG_FILE_ACCEPT),
            Frame::FileReject => buf.put_u8(TAG_FILE_REJECT),
            Frame::EncryptionKey(key) => {
                buf.put_u8(TAG_ENCRYPTION_KEY);
                buf.put_slice(key);
            }
            Frame::QueueInfo(info) => {
                buf.put_u8(TAG_QUEUE_INFO);
                buf.put_slice(&serde_json::to_vec(info).expect("QueueInfo always serializes"));
            }
        }
        buf.freeze()
    }

    pub fn decode(mut data: Bytes) -> Result<Frame, TransferError> {
        if data.is_empty() {
            return Err(TransferError::MalformedFrame("empty frame".into()));
        }
        let tag = data.get_u8();
        match tag {
            TAG_FILE_INFO => Ok(Frame::FileInfo(serde_json::from_slice(&data)?)),
            TAG_FILE_CHUNK => {
                if data.remaining() < 5 {
                    return Err(TransferError::MalformedFrame(
                        "truncated FILE_CHUNK header".into(),
                    ));
                }
                let chunk_index = data.get_u32();
                let id_len = data.get_u8() as usize;
                if data.remaining() < id_len + 1 {
                    return Err(TransferError::MalformedFrame("truncated file_id".into()));
                }
                let file_id = String::from_utf8(data.copy_to_bytes(id_len).to_vec())
                    .map_err(|e| TransferError::MalformedFrame(e.to_string()))?;
                let iv_len = data.get_u8() as usize;
                if data.remaining() < iv_len {
                    return Err(TransferError::MalformedFrame("truncated iv".into()));
                }
                let iv = data.copy_to_bytes(iv_len).to_vec();
                Ok(Frame::FileChunk {
                    chunk_index,
                    file_id,
                    iv,
                    ciphertext: data,
                })
            }
            TAG_FILE_COMPLETE => Ok(Frame::FileComplete),
            TAG_FILE_ACCEPT => Ok(Frame::FileAccept),
            TAG_FILE_REJECT => Ok(Frame::FileReject),
            TAG_ENCRYPTION_KEY => {
                if data.remaining() != 32 {
                    return Err(TransferError::MalformedFrame(format!(
                        "encryption key must be 32 bytes, got {}",
                        data.remaining()
                    )));
                }
                let mut key = [0u8; 32];
                key.copy_from_slice(&data);
                Ok(Frame::EncryptionKey(key))
            }
            TAG_QUEUE_INFO => Ok(Frame::QueueInfo(serde_json::from_slice(&data)?)),
            other => Err(TransferError::UnknownTag(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_info_roundtrips() {
        let info = FileInfo {
            id: "f1".into(),
            name: "hello.bin".into(),
            size: 204_800,
            mime_type: "application/octet-stream".into(),
            total_chunks: 4,
            path: None,
        };
        let encoded = Frame::FileInfo(info.clone()).encode();
        match Frame::decode(encoded).unwrap() {
            Frame::FileInfo(decoded) => {
                assert_eq!(decoded.id, info.id);
                assert_eq!(decoded.total_chunks, info.total_chunks);
            }
            other => panic!("expected FileInfo, got {other:?}"),
        }
    }

    #[test]
    fn file_chunk_roundtrips_with_iv_and_ciphertext() {
        let frame = Frame::FileChunk {
            chunk_index: 42,
            file_id: "abc-123".into(),
            iv: vec![0u8; 12],
            ciphertext: Bytes::from_static(b"ciphertext-and-tag"),
        };
        let encoded = frame.encode();
        match Frame::decode(encoded).unwrap() {
            Frame::FileChunk {
                chunk_index,
                file_id,
                iv,
                ciphertext,
            } => {
                assert_eq!(chunk_index, 42);
                assert_eq!(file_id, "abc-123");
                assert_eq!(iv.len(), 12);
                assert_eq!(&ciphertext[..], b"ciphertext-and-tag");
            }
            other => panic!("expected FileChunk, got {other:?}"),
        }
    }

    #[test]
    fn encryption_key_requires_exactly_32_bytes() {
        let mut buf = BytesMut::new();
        buf.put_u8(TAG_ENCRYPTION_KEY);
        buf.put_slice(&[0u8; 16]);
        assert!(Frame::decode(buf.freeze()).is_err());
    }

    #[test]
    fn reserved_progress_tag_is_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u8(TAG_PROGRESS);
        assert!(matches!(
            Frame::decode(buf.freeze()),
            Err(TransferError::UnknownTag(TAG_PROGRESS))
        ));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let buf = Bytes::from_static(&[0xEE]);
        assert!(matches!(
            Frame::decode(buf),
            Err(TransferError::UnknownTag(0xEE))
        ));
    }

    #[test]
    fn empty_frame_is_rejected() {
        assert!(Frame::decode(Bytes::new()).is_err());
    }
}
