//! Function tables
//!
//! A module may define one `funcref` table, filled by its element segments
//! and read by `call_indirect`. Tables are never visible to the host: they
//! cannot be imported or exported.

use super::func::Func;
use super::store::Stored;
use super::trap::{Trap, TrapCode};
use crate::parser::module::TableType;

pub(crate) struct TableEntity {
    /// `None` slots are null references.
    elements: Vec<Option<Func>>,
}

impl TableEntity {
    /// A table of `limits.min` null references.
    pub(crate) fn new(table_type: TableType) -> Self {
        TableEntity {
            elements: vec![None; table_type.limits.min as usize],
        }
    }

    /// The function at `index`, trapping on an index past the end or a null
    /// slot.
    pub(crate) fn get(&self, index: u32) -> Result<Func, Trap> {
        self.elements
            .get(index as usize)
            .ok_or_else(|| Trap::from(TrapCode::OutOfBoundsTableAccess))?
            .ok_or_else(|| TrapCode::UninitializedElement.into())
    }

    /// Check that `len` entries fit at `offset` without writing them.
    pub(crate) fn check_range(&self, offset: u32, len: usize) -> Result<(), Trap> {
        if offset as u64 + len as u64 > self.elements.len() as u64 {
            return Err(TrapCode::OutOfBoundsTableAccess.into());
        }
        Ok(())
    }

    pub(crate) fn init(&mut self, offset: u32, funcs: &[Func]) -> Result<(), Trap> {
        self.check_range(offset, funcs.len())?;
        let start = offset as usize;
        for (slot, func) in self.elements[start..start + funcs.len()].iter_mut().zip(funcs) {
            *slot = Some(*func);
        }
        Ok(())
    }
}

/// Store handle of an instance's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Table(pub(crate) Stored<TableEntity>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::module::Limits;

    fn table(min: u32) -> TableEntity {
        TableEntity::new(TableType {
            limits: Limits { min, max: None },
        })
    }

    #[test]
    fn test_new_table_is_null() {
        let table = table(3);
        assert_eq!(table.elements.len(), 3);
        assert_eq!(table.get(0).unwrap_err().code(), Some(TrapCode::UninitializedElement));
        assert_eq!(table.get(3).unwrap_err().code(), Some(TrapCode::OutOfBoundsTableAccess));
    }

    #[test]
    fn test_range_checks() {
        let mut table = table(2);
        assert!(table.check_range(2, 0).is_ok());
        assert!(table.check_range(1, 2).is_err());
        assert!(table.check_range(u32::MAX, 2).is_err());
        assert!(table.init(0, &[]).is_ok());
    }
}
