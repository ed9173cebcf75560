//! Persistent storage for sets, memberships and state pointers.
//!
//! Architecture:
//! ```text
//! ┌──────────────┐   begin()    ┌──────────────┐   commit()   ┌──────────────┐
//! │ Navigator /  │ ───────────► │ StoreTxn     │ ───────────► │ LiveStore    │
//! │ PositionMgr  │              │ (staged,     │  WriteBatch  │ (RocksDB)    │
//! └──────────────┘              │  uniqueness  │              └──────┬───────┘
//!                               │  enforced)   │                     │
//!                               └──────────────┘                     │ column families
//!                                                                    ▼
//!                     ┌─────────────────────────────────────────────────────┐
//!                     │ CF "sets"         : set records                     │
//!                     │ CF "tenant_sets"  : tenant:set listing index        │
//!                     │ CF "slugs"        : tenant:slug → set (unique)      │
//!                     │ CF "memberships"  : membership records              │
//!                     │ CF "positions"    : set:position → membership       │
//!                     │ CF "pointers"     : set → state pointer (one each)  │
//!                     └─────────────────────────────────────────────────────┘
//! ```
//!
//! A transaction stages writes in memory and lands them as one atomic
//! `WriteBatch`, so no reader ever sees a half-applied renumbering.

pub mod rocks;
pub mod txn;

pub use rocks::{LiveStore, StoreConfig, StoreError};
pub use txn::StoreTxn;
