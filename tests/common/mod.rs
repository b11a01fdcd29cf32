#![allow(dead_code)]

use std::sync::Arc;
use txstage::entity::{expect_i64, expect_text};
use txstage::{
    DataType, Entity, EntityDescriptor, MemoryStore, SingleExecutorResolver, SurrogateKey,
    UnitOfWork,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub owner: String,
    pub balance: i64,
}

impl Account {
    pub fn new(id: i64, owner: &str, balance: i64) -> Self {
        Self {
            id,
            owner: owner.to_string(),
            balance,
        }
    }
}

impl Entity for Account {
    fn descriptor() -> EntityDescriptor<Self> {
        EntityDescriptor::builder("account")
            .field("id", DataType::Integer, |a: &Account| a.id.into(), |a, v| {
                a.id = expect_i64(v, "id")?;
                Ok(())
            })
            .field("owner", DataType::Text, |a: &Account| a.owner.clone().into(), |a, v| {
                a.owner = expect_text(v, "owner")?;
                Ok(())
            })
            .field("balance", DataType::Integer, |a: &Account| a.balance.into(), |a, v| {
                a.balance = expect_i64(v, "balance")?;
                Ok(())
            })
            .primary_key(["id"])
            .build()
    }
}

/// Keyless entity: identity comes from a per-instance surrogate token.
#[derive(Debug, Clone, Default)]
pub struct Tag {
    pub key: SurrogateKey,
    pub label: String,
}

impl Tag {
    pub fn new(label: &str) -> Self {
        Self {
            key: SurrogateKey::new(),
            label: label.to_string(),
        }
    }
}

impl Entity for Tag {
    fn descriptor() -> EntityDescriptor<Self> {
        EntityDescriptor::builder("tag")
            .field("label", DataType::Text, |t: &Tag| t.label.clone().into(), |t, v| {
                t.label = expect_text(v, "label")?;
                Ok(())
            })
            .surrogate_key(tag_key)
            .build()
    }
}

fn tag_key(tag: &Tag) -> &SurrogateKey {
    &tag.key
}

pub fn accounts(rows: Vec<Account>) -> Arc<MemoryStore<Account>> {
    Arc::new(MemoryStore::with_rows("accounts", rows).unwrap())
}

pub fn unit_over(store: &Arc<MemoryStore<Account>>) -> Arc<UnitOfWork> {
    Arc::new(UnitOfWork::new(Arc::new(SingleExecutorResolver::new(
        store.clone(),
    ))))
}
