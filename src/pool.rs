//! # Entity Pool Module
//!
//! A fixed-capacity pool of identity-bearing, reusable workers.
//!
//! ## Overview
//!
//! `EntityPool` owns `total` entities created up front by a factory. Idle
//! entities sit in a bounded `kanal` channel; `take()` waits on that channel,
//! which is what gives the pool its admission control: once every entity is
//! checked out, further takers park until one is returned.
//!
//! Alongside the channel, a membership map records for every identity the
//! pool created whether it is currently idle. `put_back` consults it under a
//! single lock, so an entity can only come back once per checkout and
//! entities the pool never created are rejected.
//!
//! `checkout()` wraps `take()` in a `Checkout` guard that hands the entity
//! back when released or dropped, including while unwinding from a panic.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use kanal::{AsyncReceiver, AsyncSender};
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::error::EngineError;
use crate::id::IdGenerator;

/// A worker that can live in an `EntityPool`.
pub trait PoolEntity: Send + Sync + 'static {
    /// Pool-scoped identity, fixed at creation.
    fn id(&self) -> u32;

    /// Concrete kind of the entity; a pool only accepts one kind.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

pub struct EntityPool<E: PoolEntity> {
    total: u32,
    kind: &'static str,
    idle_tx: AsyncSender<E>,
    idle_rx: AsyncReceiver<E>,
    /// identity -> is idle
    members: Mutex<HashMap<u32, bool>>,
}

impl<E: PoolEntity> EntityPool<E> {
    /// Creates `total` entities through `factory`, which receives the identity
    /// drawn from `ids` for each new entity.
    pub fn new<F>(total: u32, ids: &IdGenerator, mut factory: F) -> Result<Self, EngineError>
    where
        F: FnMut(u32) -> E,
    {
        if total == 0 {
            return Err(EngineError::InvalidConfig(
                "entity pool size must be greater than 0.".to_string(),
            ));
        }

        let (idle_tx, idle_rx) = kanal::bounded_async(total as usize);
        let mut members = HashMap::with_capacity(total as usize);
        let mut kind = None;

        for _ in 0..total {
            let entity = factory(ids.next_id());
            let expected = *kind.get_or_insert(entity.kind());
            if entity.kind() != expected {
                return Err(EngineError::TypeMismatch {
                    expected,
                    found: entity.kind(),
                });
            }
            let id = entity.id();
            if members.insert(id, true).is_some() {
                return Err(EngineError::InvalidEntity(format!(
                    "factory produced duplicate identity {}",
                    id
                )));
            }
            match idle_tx.try_send(entity) {
                Ok(true) => {}
                _ => {
                    return Err(EngineError::InvalidEntity(format!(
                        "could not seed entity {} into the pool",
                        id
                    )));
                }
            }
        }

        let kind = kind.unwrap_or_else(std::any::type_name::<E>);
        debug!("Entity pool of {} `{}` entities created", total, kind);

        Ok(Self {
            total,
            kind,
            idle_tx,
            idle_rx,
            members: Mutex::new(members),
        })
    }

    /// Waits for an idle entity and marks it checked out.
    pub async fn take(&self) -> Result<E, EngineError> {
        let entity = self
            .idle_rx
            .recv()
            .await
            .map_err(|_| EngineError::PoolClosed)?;
        self.members.lock().insert(entity.id(), false);
        trace!("Entity {} checked out of `{}` pool", entity.id(), self.kind);
        Ok(entity)
    }

    /// Like `take`, but the entity is returned automatically when the guard goes away.
    pub async fn checkout(self: &Arc<Self>) -> Result<Checkout<E>, EngineError> {
        let entity = self.take().await?;
        Ok(Checkout {
            pool: Arc::clone(self),
            entity: Some(entity),
        })
    }

    /// Hands a checked-out entity back to the pool.
    pub fn put_back(&self, entity: E) -> Result<(), EngineError> {
        if entity.kind() != self.kind {
            return Err(EngineError::TypeMismatch {
                expected: self.kind,
                found: entity.kind(),
            });
        }

        let id = entity.id();
        {
            let mut members = self.members.lock();
            match members.get_mut(&id) {
                None => return Err(EngineError::NotOwned(id)),
                Some(true) => return Err(EngineError::AlreadyReturned(id)),
                Some(idle) => *idle = true,
            }
        }

        match self.idle_tx.try_send(entity) {
            Ok(true) => {
                trace!("Entity {} returned to `{}` pool", id, self.kind);
                Ok(())
            }
            Ok(false) => {
                // Capacity equals `total`, so this only happens if membership was corrupted.
                error!("Entity pool `{}` rejected entity {}: container full", self.kind, id);
                Err(EngineError::InvalidEntity(format!(
                    "pool container full while returning entity {}",
                    id
                )))
            }
            Err(_) => Err(EngineError::PoolClosed),
        }
    }

    /// Tears the pool down. Pending and future `take()`s fail with `PoolClosed`.
    pub fn close(&self) {
        let _ = self.idle_rx.close();
        debug!("Entity pool `{}` closed", self.kind);
    }

    pub fn is_closed(&self) -> bool {
        self.idle_rx.is_closed()
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    /// Number of entities currently checked out.
    pub fn used(&self) -> u32 {
        self.total.saturating_sub(self.idle_rx.len() as u32)
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

/// An entity borrowed from an `EntityPool`.
pub struct Checkout<E: PoolEntity> {
    pool: Arc<EntityPool<E>>,
    entity: Option<E>,
}

impl<E: PoolEntity> Checkout<E> {
    /// Returns the entity now, reporting any pool error.
    pub fn release(mut self) -> Result<(), EngineError> {
        match self.entity.take() {
            Some(entity) => self.pool.put_back(entity),
            None => Ok(()),
        }
    }
}

impl<E: PoolEntity> Deref for Checkout<E> {
    type Target = E;

    fn deref(&self) -> &E {
        self.entity
            .as_ref()
            .unwrap_or_else(|| unreachable!("checkout accessed after release"))
    }
}

impl<E: PoolEntity> Drop for Checkout<E> {
    fn drop(&mut self) {
        if let Some(entity) = self.entity.take() {
            let id = entity.id();
            if let Err(e) = self.pool.put_back(entity) {
                error!("Failed to return entity {} on drop: {}", id, e);
            }
        }
    }
}
