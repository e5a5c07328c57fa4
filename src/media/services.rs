use anyhow::Context;
use bytes::Bytes;
use uuid::Uuid;

use crate::state::AppState;

/// One file taken from a multipart request.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
}

/// Where a profile image ends up in the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSlot {
    Avatar,
    CoverImage,
}

impl MediaSlot {
    fn prefix(self) -> &'static str {
        match self {
            MediaSlot::Avatar => "avatars",
            MediaSlot::CoverImage => "covers",
        }
    }
}

pub async fn upload_profile_image(
    st: &AppState,
    slot: MediaSlot,
    item: UploadItem,
) -> anyhow::Result<String> {
    anyhow::ensure!(!item.body.is_empty(), "empty file");

    let ext = ext_from_mime(&item.content_type).unwrap_or("bin");
    let key = format!("{}/{}.{}", slot.prefix(), Uuid::new_v4(), ext);
    st.media
        .upload(&key, item.body, &item.content_type)
        .await
        .with_context(|| format!("upload {:?} to {}", slot, key))
}

fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        _ => None,
    }
}

#[cfg(test)]
mod media_tests {
    use super::*;
    use crate::state::AppState;

    #[test]
    fn test_ext_from_mime() {
        assert_eq!(ext_from_mime("image/jpeg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/jpg"), Some("jpg"));
        assert_eq!(ext_from_mime("image/png"), Some("png"));
        assert_eq!(ext_from_mime("image/webp"), Some("webp"));
        assert_eq!(ext_from_mime("application/octet-stream"), None);
    }

    #[tokio::test]
    async fn uploads_into_slot_prefix() {
        let state = AppState::fake();
        let url = upload_profile_image(
            &state,
            MediaSlot::CoverImage,
            UploadItem {
                body: Bytes::from_static(b"\x89PNG"),
                content_type: "image/png".into(),
            },
        )
        .await
        .unwrap();
        assert!(url.starts_with("https://fake.local/covers/"));
        assert!(url.ends_with(".png"));
    }

    #[tokio::test]
    async fn refuses_empty_file() {
        let state = AppState::fake();
        let res = upload_profile_image(
            &state,
            MediaSlot::Avatar,
            UploadItem {
                body: Bytes::new(),
                content_type: "image/png".into(),
            },
        )
        .await;
        assert!(res.is_err());
    }
}
