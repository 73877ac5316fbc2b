//! Identifier to display-name resolution.
//!
//! Lookups never fail from the caller's point of view: anything that cannot
//! be resolved is shown as its raw identifier.

use std::collections::HashMap;

use async_trait::async_trait;

#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn user_name(&self, user_id: &str) -> String;
    async fn channel_name(&self, channel_id: &str) -> String;
}

/// Resolves every identifier to itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl NameResolver for PassthroughResolver {
    async fn user_name(&self, user_id: &str) -> String {
        user_id.to_string()
    }

    async fn channel_name(&self, channel_id: &str) -> String {
        channel_id.to_string()
    }
}

/// Names resolved ahead of rendering, so rendering itself stays synchronous.
#[derive(Debug, Clone, Default)]
pub struct NameBook {
    users: HashMap<String, String>,
    channels: HashMap<String, String>,
}

impl NameBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the given ids through `resolver`. Duplicates are looked up once.
    pub async fn resolve<'a, U, C>(resolver: &dyn NameResolver, user_ids: U, channel_ids: C) -> Self
    where
        U: IntoIterator<Item = &'a str>,
        C: IntoIterator<Item = &'a str>,
    {
        let mut book = Self::new();
        for id in user_ids {
            if !book.users.contains_key(id) {
                let name = resolver.user_name(id).await;
                book.users.insert(id.to_string(), name);
            }
        }
        for id in channel_ids {
            if !book.channels.contains_key(id) {
                let name = resolver.channel_name(id).await;
                book.channels.insert(id.to_string(), name);
            }
        }
        book
    }

    pub fn insert_user(&mut self, id: impl Into<String>, name: impl Into<String>) {
        self.users.insert(id.into(), name.into());
    }

    pub fn insert_channel(&mut self, id: impl Into<String>, name: impl Into<String>) {
        self.channels.insert(id.into(), name.into());
    }

    pub fn user<'a>(&'a self, id: &'a str) -> &'a str {
        self.users.get(id).map(String::as_str).unwrap_or(id)
    }

    pub fn channel<'a>(&'a self, id: &'a str) -> &'a str {
        self.channels.get(id).map(String::as_str).unwrap_or(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    #[async_trait]
    impl NameResolver for Upper {
        async fn user_name(&self, user_id: &str) -> String {
            user_id.to_uppercase()
        }
        async fn channel_name(&self, channel_id: &str) -> String {
            format!("chan-{}", channel_id)
        }
    }

    #[tokio::test]
    async fn test_passthrough() {
        assert_eq!(PassthroughResolver.user_name("U1").await, "U1");
        assert_eq!(PassthroughResolver.channel_name("C1").await, "C1");
    }

    #[tokio::test]
    async fn test_resolve_book() {
        let book = NameBook::resolve(&Upper, ["u1", "u2", "u1"], ["c1"]).await;
        assert_eq!(book.user("u1"), "U1");
        assert_eq!(book.user("u2"), "U2");
        assert_eq!(book.channel("c1"), "chan-c1");
    }

    #[test]
    fn test_unknown_ids_fall_back_to_raw() {
        let mut book = NameBook::new();
        book.insert_user("U1", "Hana");
        assert_eq!(book.user("U1"), "Hana");
        assert_eq!(book.user("U404"), "U404");
        assert_eq!(book.channel("C404"), "C404");
    }
}
