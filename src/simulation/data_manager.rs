//! Data managers and their type-indexed registry.

use std::any::{self, Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{ContractError, NucleusResult};
use crate::ids::{DataManagerId, IdKind};

use super::context::DataManagerContext;
use super::state::StateContext;

/// Exclusive owner of one plugin's mutable state within a simulation.
///
/// Data managers are created by plugin initializers and live exactly as long
/// as their simulation. Everything else reaches them through contexts.
pub trait DataManager: Any {
    /// Called once, after every plugin initializer has run, in registration
    /// order.
    ///
    /// # Errors
    ///
    /// Any error aborts the simulation.
    fn init(&mut self, ctx: &mut DataManagerContext<'_>) -> NucleusResult<()>;

    /// Releases this manager's state as plugin data when the simulation halts
    /// with state recording on.
    ///
    /// # Errors
    ///
    /// Any error aborts the simulation.
    fn record_state(&self, ctx: &mut StateContext<'_>) -> NucleusResult<()> {
        let _ = ctx;
        Ok(())
    }
}

struct Slot {
    type_name: &'static str,
    typed: Rc<dyn Any>,
    erased: Rc<RefCell<dyn DataManager>>,
}

/// Data managers of one simulation, indexed by type.
///
/// A data manager's id is its registration index. Each manager sits in its
/// own `RefCell`; borrowing a manager that is already borrowed further up
/// the call stack is reported as `DataManagerBusy`.
#[derive(Default)]
pub struct DataManagerRegistry {
    slots: Vec<Slot>,
    by_type: HashMap<TypeId, DataManagerId>,
}

impl DataManagerRegistry {
    pub(crate) fn insert<T: DataManager>(&mut self, data_manager: T) -> Result<DataManagerId, ContractError> {
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) {
            return Err(ContractError::DuplicateId {
                kind: IdKind::DataManager,
                id: any::type_name::<T>().to_string(),
            });
        }
        let id = DataManagerId::new(self.slots.len() as u64);
        let cell = Rc::new(RefCell::new(data_manager));
        let typed: Rc<dyn Any> = cell.clone();
        self.slots.push(Slot {
            type_name: any::type_name::<T>(),
            typed,
            erased: cell,
        });
        self.by_type.insert(type_id, id);
        Ok(id)
    }

    /// Id of the data manager of type `T`, if registered.
    #[must_use]
    pub fn id_of<T: DataManager>(&self) -> Option<DataManagerId> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    #[must_use]
    pub fn contains<T: DataManager>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = DataManagerId> + '_ {
        (0..self.slots.len()).map(|i| DataManagerId::new(i as u64))
    }

    fn slot(&self, id: DataManagerId) -> Option<&Slot> {
        usize::try_from(id.value()).ok().and_then(|i| self.slots.get(i))
    }

    pub(crate) fn type_name(&self, id: DataManagerId) -> &'static str {
        self.slot(id).map_or("<unknown>", |slot| slot.type_name)
    }

    pub(crate) fn busy(&self, id: DataManagerId) -> ContractError {
        ContractError::DataManagerBusy {
            type_name: self.type_name(id).to_string(),
        }
    }

    pub(crate) fn erased(&self, id: DataManagerId) -> Result<Rc<RefCell<dyn DataManager>>, ContractError> {
        self.slot(id)
            .map(|slot| Rc::clone(&slot.erased))
            .ok_or_else(|| ContractError::unknown(&id))
    }

    pub(crate) fn cell<T: DataManager>(&self) -> Result<Rc<RefCell<T>>, ContractError> {
        let unknown = || ContractError::UnknownId {
            kind: IdKind::DataManager,
            id: any::type_name::<T>().to_string(),
        };
        let id = self.id_of::<T>().ok_or_else(unknown)?;
        let slot = self.slot(id).ok_or_else(unknown)?;
        Rc::clone(&slot.typed).downcast::<RefCell<T>>().map_err(|_| unknown())
    }

    /// Runs `f` against a shared borrow of the data manager of type `T`.
    ///
    /// # Errors
    ///
    /// `UnknownId` if no such manager exists, `DataManagerBusy` if it is
    /// mutably borrowed.
    pub fn read<T: DataManager, R>(&self, f: impl FnOnce(&T) -> R) -> NucleusResult<R> {
        let cell = self.cell::<T>()?;
        let guard = cell.try_borrow().map_err(|_| busy::<T>())?;
        Ok(f(&guard))
    }
}

pub(crate) fn busy<T>() -> ContractError {
    ContractError::DataManagerBusy {
        type_name: any::type_name::<T>().to_string(),
    }
}
