use std::fmt;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Identity slot for entities without a primary key.
///
/// The token is generated on first use and shared by every clone of the
/// owning entity. Two separately constructed entities never share a token,
/// even when all of their fields are equal.
#[derive(Clone, Default)]
pub struct SurrogateKey(Arc<OnceLock<String>>);

impl SurrogateKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> &str {
        self.0.get_or_init(|| Uuid::new_v4().simple().to_string())
    }

    pub fn is_assigned(&self) -> bool {
        self.0.get().is_some()
    }
}

impl PartialEq for SurrogateKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SurrogateKey {}

impl fmt::Debug for SurrogateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.get() {
            Some(token) => write!(f, "SurrogateKey({})", token),
            None => write!(f, "SurrogateKey(unassigned)"),
        }
    }
}
