mod common;

use sealzip::hash::crc32;
use sealzip::zip::GeneralPurposeFlags;
use sealzip::{CodecQueue, Error, ExtractOptions, WriteOptions, ZipEntry, ZipWriter};

use common::{TEXT_FILES, open, text_archive};

fn local_flags(bytes: &[u8], offset: u64) -> u16 {
    let at = offset as usize + 6;
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

#[tokio::test]
async fn encrypted_flag_is_set_on_every_entry_including_the_last() {
    let bytes = text_archive(WriteOptions::new().password("hunter2")).await;
    let extractor = open(bytes.clone(), ExtractOptions::new()).await.unwrap();
    let entries = extractor.list_files().unwrap();
    assert_eq!(entries.len(), TEXT_FILES.len());

    for entry in entries {
        assert!(entry.is_encrypted(), "central flag on {}", entry.file_name);
        assert_ne!(
            local_flags(&bytes, entry.lfh_offset) & GeneralPurposeFlags::ENCRYPTED,
            0,
            "local flag on {}",
            entry.file_name
        );
    }
}

#[tokio::test]
async fn missing_password_fails_and_correct_password_succeeds() {
    let bytes = text_archive(WriteOptions::new().password("hunter2")).await;

    let locked = open(bytes.clone(), ExtractOptions::new()).await.unwrap();
    for entry in locked.list_files().unwrap() {
        let err = locked.extract_to_memory(entry).await.unwrap_err();
        assert!(matches!(err, Error::PasswordIncorrect { .. }), "{err}");
    }

    let unlocked = open(bytes, ExtractOptions::new().password("hunter2"))
        .await
        .unwrap();
    for (entry, (_, text)) in unlocked.list_files().unwrap().iter().zip(TEXT_FILES) {
        let data = unlocked.extract_to_memory(entry).await.unwrap();
        assert_eq!(data, text.as_bytes());
        assert_eq!(entry.crc32, Some(crc32(&data)));
    }
}

#[tokio::test]
async fn wrong_password_is_rejected_before_output() {
    let mut writer = ZipWriter::new(
        Vec::new(),
        CodecQueue::shared(),
        WriteOptions::new().password("right").zstd(true),
    )
    .unwrap();
    let data = vec![42u8; 4096];
    writer.add_bytes("buffered", &data).await.unwrap();
    writer
        .add_stream(ZipEntry::new("streamed"), &mut &data[..])
        .await
        .unwrap();
    let (bytes, _) = writer.finish().await.unwrap();

    // A wrong password passes the single check byte 1 time in 256, then
    // fails the CRC instead; either way no data comes back.
    let wrong = open(bytes.clone(), ExtractOptions::new().password("wrong"))
        .await
        .unwrap();
    for entry in wrong.list_files().unwrap() {
        let mut sink = Vec::new();
        let result = wrong.extract_to_writer(entry, &mut sink).await;
        assert!(result.is_err());
    }

    let right = open(bytes, ExtractOptions::new().password("right"))
        .await
        .unwrap();
    for entry in right.list_files().unwrap() {
        assert_eq!(right.extract_to_memory(entry).await.unwrap(), data);
        assert_eq!(right.test_entry(entry).await.unwrap(), 4096);
    }
}
