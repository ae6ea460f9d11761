use anyhow::Result;
use secrecy::ExposeSecret;
use std::{future::Future, pin::Pin};
use tracing::info;

use crate::auth::{AuthToken, Identity};

pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Delivers activation tokens to newly registered users.
pub trait ActivationNotifier: Send + Sync {
    /// Hand over the plaintext token; errors are logged and the account is kept.
    fn send_activation<'a>(&'a self, identity: &'a Identity, token: &'a AuthToken)
    -> NotifyFuture<'a>;
}

/// Local dev notifier that logs the message instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogActivationNotifier;

impl ActivationNotifier for LogActivationNotifier {
    fn send_activation<'a>(
        &'a self,
        identity: &'a Identity,
        token: &'a AuthToken,
    ) -> NotifyFuture<'a> {
        Box::pin(async move {
            info!(
                user_id = identity.id,
                to_email = %identity.email,
                activation_token = token.plaintext.expose_secret(),
                expiry = %token.expiry,
                "activation email send stub"
            );
            Ok(())
        })
    }
}
