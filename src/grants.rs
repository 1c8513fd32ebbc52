// Signed, time-boxed access grants for the external media service.
//
// The media service validates HS256 JWTs minted against a shared API
// secret. Host privileges (recording, moderation) are decided here, from
// the authoritative class record, never from a caller-supplied flag alone.

use std::env;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::ApiError;
use crate::session::SessionStatus;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_GRANT_TTL_SECS: u64 = 14_400;

#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub api_key: String,
    pub api_secret: String,
    pub service_url: String,
    pub grant_ttl: Duration,
}

impl MediaConfig {
    pub fn from_env() -> Result<Self, ApiError> {
        let api_key = env::var("MEDIA_API_KEY").ok();
        let api_secret = env::var("MEDIA_API_SECRET").ok();
        let service_url = env::var("MEDIA_SERVICE_URL").ok();
        let (api_key, api_secret, service_url) = match (api_key, api_secret, service_url) {
            (Some(k), Some(s), Some(u)) if !k.is_empty() && !s.is_empty() && !u.is_empty() => {
                (k, s, u)
            }
            _ => {
                return Err(ApiError::Config(
                    "media service credentials missing".into(),
                ))
            }
        };
        let grant_ttl = env::var("MEDIA_GRANT_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_GRANT_TTL_SECS);
        Ok(MediaConfig {
            api_key,
            api_secret,
            service_url,
            grant_ttl: Duration::from_secs(grant_ttl),
        })
    }
}

/// Room naming convention shared with the clients.
pub fn room_name(class_id: Uuid) -> String {
    format!("class-{}", class_id)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoGrant<'a> {
    room: &'a str,
    room_join: bool,
    can_publish: bool,
    can_subscribe: bool,
    can_publish_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_record: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    room_admin: Option<bool>,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    sub: &'a str,
    name: &'a str,
    nbf: i64,
    exp: i64,
    video: VideoGrant<'a>,
}

#[derive(Serialize, Debug, Clone)]
pub struct AccessGrant {
    pub token: String,
    pub room: String,
    pub service_url: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues a capability token for the session's room.
///
/// Host privileges require both the request flag and the caller actually
/// being the instructor of record; a host request from anyone else is an
/// authorization failure, not a silent downgrade. Issuance follows
/// joinability: live for everyone, upcoming for the instructor only, ended
/// for nobody.
pub fn issue_access_grant(
    cfg: &MediaConfig,
    class_id: Uuid,
    instructor_id: &str,
    status: SessionStatus,
    user_id: &str,
    display_name: &str,
    host_requested: bool,
) -> Result<AccessGrant, ApiError> {
    let is_instructor = user_id == instructor_id;
    if host_requested && !is_instructor {
        return Err(ApiError::Authorization(
            "host privileges require the class instructor".into(),
        ));
    }
    match status {
        SessionStatus::Live => {}
        SessionStatus::Upcoming if is_instructor => {}
        SessionStatus::Upcoming => {
            return Err(ApiError::SessionNotJoinable(
                "session has not started".into(),
            ))
        }
        SessionStatus::Ended => {
            return Err(ApiError::SessionNotJoinable("session has ended".into()))
        }
    }

    let room = room_name(class_id);
    let as_host = host_requested && is_instructor;
    let now = Utc::now();
    let ttl = chrono::Duration::from_std(cfg.grant_ttl)
        .map_err(|e| ApiError::Config(format!("grant ttl out of range: {e}")))?;
    let expires_at = now + ttl;
    let claims = Claims {
        iss: &cfg.api_key,
        sub: user_id,
        name: display_name,
        nbf: now.timestamp(),
        exp: expires_at.timestamp(),
        video: VideoGrant {
            room: &room,
            room_join: true,
            can_publish: true,
            can_subscribe: true,
            can_publish_data: true,
            room_record: as_host.then_some(true),
            room_admin: as_host.then_some(true),
        },
    };

    let token = sign_hs256(&cfg.api_secret, &claims)?;
    Ok(AccessGrant {
        token,
        room,
        service_url: cfg.service_url.clone(),
        expires_at,
    })
}

fn sign_hs256<T: Serialize>(secret: &str, claims: &T) -> Result<String, ApiError> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = serde_json::to_vec(claims)
        .map_err(|e| ApiError::Config(format!("grant serialization failed: {e}")))?;
    let payload = URL_SAFE_NO_PAD.encode(payload);
    let signing_input = format!("{header}.{payload}");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Config(format!("invalid media secret: {e}")))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{signing_input}.{signature}"))
}
