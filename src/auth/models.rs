//! Authentication Models
//! Mission: Define user and authentication data structures

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account as persisted in the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String, // bcrypt hash - never returned by the API
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub banned: bool,
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String, // subject (user_id)
    pub username: String,
    #[serde(default)]
    pub admin: bool,
    pub exp: usize, // expiration timestamp
}

/// Register / login request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub captcha_id: String,
    #[serde(default)]
    pub captcha_code: String,
}

/// Login response
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub username: String,
    pub id: String,
    pub is_admin: bool,
}

/// User response (sanitized)
#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
    pub banned: bool,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            username: user.username.clone(),
            is_admin: user.is_admin,
            banned: user.banned,
        }
    }
}

/// Captcha challenge handed to the client
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaResponse {
    pub captcha_id: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_storage_format_is_camel_case() {
        let user = User {
            id: Uuid::nil(),
            username: "alice".to_string(),
            password_hash: "$2b$04$hash".to_string(),
            is_admin: true,
            banned: false,
        };
        let json = serde_json::to_value(&user).unwrap();
        assert_eq!(json["passwordHash"], "$2b$04$hash");
        assert_eq!(json["isAdmin"], true);
        assert_eq!(json["banned"], false);
    }

    #[test]
    fn test_user_response_hides_hash() {
        let user = User {
            id: Uuid::new_v4(),
            username: "bob".to_string(),
            password_hash: "secret".to_string(),
            is_admin: false,
            banned: true,
        };
        let json = serde_json::to_string(&UserResponse::from_user(&user)).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains(r#""banned":true"#));
    }

    #[test]
    fn test_auth_request_captcha_fields_optional() {
        let req: AuthRequest =
            serde_json::from_str(r#"{"username":"carol","password":"hunter22"}"#).unwrap();
        assert!(req.captcha_id.is_empty());
        assert!(req.captcha_code.is_empty());
    }
}
