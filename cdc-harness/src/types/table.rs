use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, HarnessError};
use crate::harness_error;

/// Logical tables of the replicated commerce schema.
///
/// The declaration order is the insert order: every table comes after the tables it
/// references, so the derived [`Ord`] sorts parents first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Customers,
    Products,
    Orders,
    OrderItems,
    InventoryMovements,
}

impl Table {
    /// Every table, parents before the tables referencing them.
    pub const INSERT_ORDER: [Table; 5] = [
        Table::Customers,
        Table::Products,
        Table::Orders,
        Table::OrderItems,
        Table::InventoryMovements,
    ];

    /// Returns the table name on both the source and the target.
    pub fn name(self) -> &'static str {
        match self {
            Table::Customers => "customers",
            Table::Products => "products",
            Table::Orders => "orders",
            Table::OrderItems => "order_items",
            Table::InventoryMovements => "inventory_movements",
        }
    }

    /// Returns the two-letter code embedded in markers.
    pub fn code(self) -> &'static str {
        match self {
            Table::Customers => "cu",
            Table::Products => "pr",
            Table::Orders => "or",
            Table::OrderItems => "oi",
            Table::InventoryMovements => "im",
        }
    }

    /// Returns the tables in deletion order, children first.
    pub fn cleanup_order() -> impl Iterator<Item = Table> {
        Self::INSERT_ORDER.into_iter().rev()
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Table {
    type Err = HarnessError;

    /// Parses a table from its name or its marker code, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::INSERT_ORDER
            .into_iter()
            .find(|table| table.name() == lowered || table.code() == lowered)
            .ok_or_else(|| {
                harness_error!(
                    ErrorKind::InvalidData,
                    "Unknown table",
                    format!(
                        "`{s}` is not one of {}",
                        Self::INSERT_ORDER.map(Table::name).join(", ")
                    )
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_order_matches_ordering() {
        let mut sorted = Table::INSERT_ORDER;
        sorted.sort();
        assert_eq!(sorted, Table::INSERT_ORDER);

        let cleanup: Vec<_> = Table::cleanup_order().collect();
        assert_eq!(cleanup.first(), Some(&Table::InventoryMovements));
        assert_eq!(cleanup.last(), Some(&Table::Customers));
    }

    #[test]
    fn parses_names_and_codes() {
        assert_eq!("orders".parse::<Table>().unwrap(), Table::Orders);
        assert_eq!("OI".parse::<Table>().unwrap(), Table::OrderItems);
        assert_eq!(
            " inventory_movements ".parse::<Table>().unwrap(),
            Table::InventoryMovements
        );

        let err = "invoices".parse::<Table>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
        assert!(err.detail().unwrap().contains("invoices"));
    }
}
