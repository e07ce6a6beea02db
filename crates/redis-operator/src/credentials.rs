//! Password secret management
//!
//! The secret is generated once and never rotated. An existing secret is
//! returned as-is without looking at its contents.

use crate::crd::Redis;
use crate::deadline::Deadline;
use crate::error::{OperatorError, Result};
use crate::events::{reasons, EventPublisher};
use crate::resources::ResourceBuilder;
use crate::store::Store;
use k8s_openapi::api::core::v1::Secret;
use kube::Resource;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, info, instrument};

/// Length of generated passwords
pub const PASSWORD_LENGTH: usize = 16;

const CHARSET: &[u8; 62] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Largest multiple of the charset size that fits in a byte
const ACCEPT_BELOW: u8 = (256 / CHARSET.len() * CHARSET.len()) as u8;

/// Generate a password from the operating system CSPRNG
pub fn generate_password(length: usize) -> Result<String> {
    generate_password_with(&mut OsRng, length)
}

/// Uniform alphanumeric password; bytes above the last full cycle are rejected
pub fn generate_password_with<R: RngCore + ?Sized>(rng: &mut R, length: usize) -> Result<String> {
    let mut password = String::with_capacity(length);
    let mut buf = [0u8; 32];
    while password.len() < length {
        rng.try_fill_bytes(&mut buf)
            .map_err(|e| OperatorError::PasswordGeneration(e.to_string()))?;
        for &b in buf.iter().filter(|&&b| b < ACCEPT_BELOW) {
            if password.len() == length {
                break;
            }
            password.push(CHARSET[usize::from(b) % CHARSET.len()] as char);
        }
    }
    Ok(password)
}

/// Ensure the password secret of `redis` exists, creating it at most once
#[instrument(skip_all, fields(secret = %redis.spec.password_secret_name))]
pub async fn ensure_secret<S: Store>(
    store: &S,
    events: &dyn EventPublisher,
    redis: &Redis,
    deadline: &Deadline,
) -> Result<Secret> {
    let builder = ResourceBuilder::new(redis)?;
    let namespace = builder.namespace();
    let name = &redis.spec.password_secret_name;

    deadline.check("get-secret")?;
    match store.get::<Secret>(namespace, name).await {
        Ok(secret) => {
            debug!(name = %name, "Secret already exists");
            return Ok(secret);
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    info!(name = %name, namespace = %namespace, "Creating a new Secret");
    let password = generate_password(PASSWORD_LENGTH)?;
    let secret = builder.build_secret(&password);

    deadline.check("create-secret")?;
    match store.create(&secret).await {
        Ok(created) => {
            events
                .publish(
                    &redis.object_ref(&()),
                    reasons::CREATED_SECRET,
                    format!("Created secret {}", name),
                )
                .await;
            Ok(created)
        }
        Err(e) if e.is_already_exists() => {
            debug!(name = %name, "Secret created concurrently, using the existing one");
            deadline.check("get-secret")?;
            store.get::<Secret>(namespace, name).await
        }
        Err(e) => Err(e),
    }
}
