use rand::rngs::StdRng;

use crate::generator::factories;
use crate::types::{Field, Table, Value};

/// Builds the non-key columns of a row for the given marker.
///
/// Foreign key columns are filled in by the generator from confirmed parent keys.
pub type RowFactory = fn(&str, &mut StdRng) -> Vec<Field>;

/// A foreign key column and the table it points to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references: Table,
}

/// Declared shape of one logical table.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub table: Table,
    /// Source-assigned auto-increment key.
    pub key_column: &'static str,
    /// Column holding the marker, [`None`] for tables correlated through a parent.
    pub marker_column: Option<&'static str>,
    /// Appended to the marker to build the column value.
    pub marker_suffix: &'static str,
    pub foreign_keys: &'static [ForeignKey],
    /// Column rewritten by update probes.
    pub mutable_column: &'static str,
    pub factory: RowFactory,
}

impl TableSpec {
    /// Returns the value the marker column takes for `marker`.
    pub fn marker_value(&self, marker: &str) -> Option<Value> {
        self.marker_column
            .map(|_| Value::Text(format!("{marker}{}", self.marker_suffix)))
    }

    /// Returns the foreign key pointing at `parent`, if any.
    pub fn reference_to(&self, parent: Table) -> Option<&ForeignKey> {
        self.foreign_keys
            .iter()
            .find(|foreign_key| foreign_key.references == parent)
    }

    /// Returns `true` if rows of this table carry their own marker.
    pub fn has_marker(&self) -> bool {
        self.marker_column.is_some()
    }
}

/// Read-only description of every table the harness writes to.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    specs: Vec<TableSpec>,
}

impl EntitySchema {
    /// Returns the commerce schema the harness ships with.
    pub fn standard() -> Self {
        const ORDERS_REFS: &[ForeignKey] = &[ForeignKey {
            column: "customer_id",
            references: Table::Customers,
        }];
        const ORDER_ITEMS_REFS: &[ForeignKey] = &[
            ForeignKey {
                column: "order_id",
                references: Table::Orders,
            },
            ForeignKey {
                column: "product_id",
                references: Table::Products,
            },
        ];
        const MOVEMENTS_REFS: &[ForeignKey] = &[ForeignKey {
            column: "product_id",
            references: Table::Products,
        }];

        let specs = vec![
            TableSpec {
                table: Table::Customers,
                key_column: "customer_id",
                marker_column: Some("email"),
                marker_suffix: "@cdc-bench.local",
                foreign_keys: &[],
                mutable_column: "email",
                factory: factories::customer,
            },
            TableSpec {
                table: Table::Products,
                key_column: "product_id",
                marker_column: Some("sku"),
                marker_suffix: "",
                foreign_keys: &[],
                mutable_column: "sku",
                factory: factories::product,
            },
            TableSpec {
                table: Table::Orders,
                key_column: "order_id",
                marker_column: Some("shipping_address"),
                marker_suffix: "",
                foreign_keys: ORDERS_REFS,
                mutable_column: "shipping_address",
                factory: factories::order,
            },
            TableSpec {
                table: Table::OrderItems,
                key_column: "order_item_id",
                marker_column: None,
                marker_suffix: "",
                foreign_keys: ORDER_ITEMS_REFS,
                mutable_column: "quantity",
                factory: factories::order_item,
            },
            TableSpec {
                table: Table::InventoryMovements,
                key_column: "movement_id",
                marker_column: Some("notes"),
                marker_suffix: "",
                foreign_keys: MOVEMENTS_REFS,
                mutable_column: "notes",
                factory: factories::inventory_movement,
            },
        ];

        Self { specs }
    }

    pub fn spec(&self, table: Table) -> &TableSpec {
        &self.specs[table.index()]
    }

    pub fn specs(&self) -> impl Iterator<Item = &TableSpec> {
        self.specs.iter()
    }

    /// Returns the tables holding a foreign key to `table`.
    pub fn children_of(&self, table: Table) -> impl Iterator<Item = Table> + '_ {
        self.specs
            .iter()
            .filter(move |spec| spec.reference_to(table).is_some())
            .map(|spec| spec.table)
    }

    /// Returns every transitive parent of `table`, in insert order.
    pub fn ancestors(&self, table: Table) -> Vec<Table> {
        let mut found = Vec::new();
        let mut stack: Vec<Table> = self
            .spec(table)
            .foreign_keys
            .iter()
            .map(|foreign_key| foreign_key.references)
            .collect();

        while let Some(parent) = stack.pop() {
            if found.contains(&parent) {
                continue;
            }
            found.push(parent);
            stack.extend(
                self.spec(parent)
                    .foreign_keys
                    .iter()
                    .map(|foreign_key| foreign_key.references),
            );
        }

        found.sort();
        found
    }

    /// Returns the parent table whose marker identifies rows of `table`.
    ///
    /// Tables with their own marker return themselves.
    pub fn marker_owner(&self, table: Table) -> Option<(Table, Option<&ForeignKey>)> {
        let spec = self.spec(table);
        if spec.has_marker() {
            return Some((table, None));
        }

        spec.foreign_keys
            .iter()
            .find(|foreign_key| self.spec(foreign_key.references).has_marker())
            .map(|foreign_key| (foreign_key.references, Some(foreign_key)))
    }
}

impl Default for EntitySchema {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn specs_are_indexed_by_table() {
        let schema = EntitySchema::standard();
        for table in Table::INSERT_ORDER {
            assert_eq!(schema.spec(table).table, table);
        }
    }

    #[test]
    fn ancestors_are_transitive_and_ordered() {
        let schema = EntitySchema::standard();
        assert_eq!(
            schema.ancestors(Table::OrderItems),
            vec![Table::Customers, Table::Products, Table::Orders]
        );
        assert_eq!(
            schema.ancestors(Table::InventoryMovements),
            vec![Table::Products]
        );
        assert!(schema.ancestors(Table::Customers).is_empty());
    }

    #[test]
    fn children_follow_foreign_keys() {
        let schema = EntitySchema::standard();
        let children: Vec<_> = schema.children_of(Table::Products).collect();
        assert_eq!(children, vec![Table::OrderItems, Table::InventoryMovements]);
        assert_eq!(schema.children_of(Table::OrderItems).count(), 0);
    }

    #[test]
    fn order_items_are_identified_through_orders() {
        let schema = EntitySchema::standard();
        let (owner, foreign_key) = schema.marker_owner(Table::OrderItems).unwrap();
        assert_eq!(owner, Table::Orders);
        assert_eq!(foreign_key.unwrap().column, "order_id");

        let spec = schema.spec(Table::Customers);
        assert_eq!(
            spec.marker_value("cdcb_x_cu_1"),
            Some(Value::Text("cdcb_x_cu_1@cdc-bench.local".to_string()))
        );
    }
}
