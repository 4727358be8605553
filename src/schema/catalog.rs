//! The Northwind entity catalog
//!
//! Field lengths, bounds and defaults mirror the relational models the
//! import files were exported from.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

use super::{EntitySchema, FieldSpec, ReferenceSpec};

/// User type codes accepted by the `users.user_type` field
pub const USER_TYPES: &[&str] = &["CUS", "EMP", "ADM"];

/// Error raised by catalog lookups and consistency checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("Unknown entity type: {0}")]
    UnknownEntity(String),

    #[error("{entity}: reference targets unknown entity '{target}'")]
    UnknownTarget { entity: String, target: String },

    #[error("{entity}: reference target '{target}' must have a single-column natural key")]
    CompositeTarget { entity: String, target: String },

    #[error("{entity}: deferred reference must target the entity itself, found '{target}'")]
    DeferredForeignTarget { entity: String, target: String },

    #[error("{entity}: natural key column '{column}' is not a field or reference")]
    UnknownKeyColumn { entity: String, column: String },

    #[error("Circular reference between entity types involving '{0}'")]
    Cycle(String),
}

/// Set of importable entity schemas
#[derive(Debug, Clone)]
pub struct Catalog {
    schemas: Vec<EntitySchema>,
}

impl Catalog {
    pub fn new(schemas: Vec<EntitySchema>) -> Self {
        Self { schemas }
    }

    /// The twelve Northwind entity types
    pub fn northwind() -> Self {
        Self::new(vec![
            users(),
            regions(),
            territories(),
            customers(),
            employees(),
            employee_territories(),
            categories(),
            suppliers(),
            shippers(),
            products(),
            orders(),
            order_details(),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&EntitySchema> {
        self.schemas.iter().find(|s| s.name == name)
    }

    /// Look up a schema, failing with [`CatalogError::UnknownEntity`]
    pub fn require(&self, name: &str) -> Result<&EntitySchema, CatalogError> {
        self.get(name)
            .ok_or_else(|| CatalogError::UnknownEntity(name.to_string()))
    }

    pub fn schemas(&self) -> &[EntitySchema] {
        &self.schemas
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.schemas.iter().map(|s| s.name).collect()
    }

    /// Check that every key and reference of every schema is consistent
    pub fn validate(&self) -> Result<(), CatalogError> {
        for schema in &self.schemas {
            for column in &schema.key {
                if schema.column_kind(column).is_none() {
                    return Err(CatalogError::UnknownKeyColumn {
                        entity: schema.name.to_string(),
                        column: column.to_string(),
                    });
                }
            }

            for reference in &schema.references {
                let target = self.get(reference.target).ok_or_else(|| {
                    CatalogError::UnknownTarget {
                        entity: schema.name.to_string(),
                        target: reference.target.to_string(),
                    }
                })?;
                if target.single_key().is_none() {
                    return Err(CatalogError::CompositeTarget {
                        entity: schema.name.to_string(),
                        target: reference.target.to_string(),
                    });
                }
                if reference.deferred && reference.target != schema.name {
                    return Err(CatalogError::DeferredForeignTarget {
                        entity: schema.name.to_string(),
                        target: reference.target.to_string(),
                    });
                }
            }
        }

        self.import_order().map(|_| ())
    }

    /// Entity types ordered so every reference target precedes its dependents
    ///
    /// Deferred references are resolved in a second pass of the same batch
    /// and do not constrain the order.
    pub fn import_order(&self) -> Result<Vec<&EntitySchema>, CatalogError> {
        let mut graph = DiGraph::<&'static str, ()>::new();
        let mut node_map: HashMap<&'static str, NodeIndex> = HashMap::new();

        for schema in &self.schemas {
            node_map.insert(schema.name, graph.add_node(schema.name));
        }

        for schema in &self.schemas {
            for reference in schema.references.iter().filter(|r| !r.deferred) {
                if let (Some(&from), Some(&to)) =
                    (node_map.get(reference.target), node_map.get(schema.name))
                {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let sorted = toposort(&graph, None)
            .map_err(|cycle| CatalogError::Cycle(graph[cycle.node_id()].to_string()))?;

        Ok(sorted
            .into_iter()
            .filter_map(|idx| self.get(graph[idx]))
            .collect())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::northwind()
    }
}

fn users() -> EntitySchema {
    EntitySchema::new("users")
        .key(&["email"])
        .field(FieldSpec::text("email").required().max_length(254))
        .field(FieldSpec::text("first_name").max_length(150))
        .field(FieldSpec::text("last_name").max_length(150))
        .field(
            FieldSpec::text("user_type")
                .one_of(USER_TYPES)
                .default_value("CUS"),
        )
        .field(FieldSpec::text("timezone").max_length(50).default_value("UTC"))
        .field(FieldSpec::text("custom_id").max_length(6))
        .field(FieldSpec::boolean("is_active").default_value(true))
        .field(FieldSpec::boolean("is_staff").default_value(false))
        .field(FieldSpec::boolean("is_superuser").default_value(false))
        .field(FieldSpec::datetime("date_joined"))
        .field(FieldSpec::datetime("last_login"))
}

fn regions() -> EntitySchema {
    EntitySchema::new("regions")
        .key(&["region_id"])
        .field(FieldSpec::integer("region_id").required())
        .field(
            FieldSpec::text("region_description")
                .required()
                .max_length(255),
        )
}

fn territories() -> EntitySchema {
    EntitySchema::new("territories")
        .key(&["territory_id"])
        .field(FieldSpec::text("territory_id").required().max_length(20))
        .field(
            FieldSpec::text("territory_description")
                .required()
                .max_length(255),
        )
        .reference(ReferenceSpec::new("region_id", "region", "regions").required())
}

fn customers() -> EntitySchema {
    EntitySchema::new("customers")
        .key(&["customer_id"])
        .field(FieldSpec::text("customer_id").required().max_length(10))
        .field(FieldSpec::text("company_name").required().max_length(255))
        .field(FieldSpec::text("contact_title").max_length(100))
        .field(FieldSpec::text("address").max_length(255))
        .field(FieldSpec::text("city").max_length(100))
        .field(FieldSpec::text("region").max_length(100))
        .field(FieldSpec::text("postal_code").max_length(20))
        .field(FieldSpec::text("country").max_length(100))
        .field(FieldSpec::text("phone").max_length(50))
        .reference(ReferenceSpec::new("user_email", "user", "users").unique())
}

fn employees() -> EntitySchema {
    EntitySchema::new("employees")
        .key(&["employee_id"])
        .field(FieldSpec::integer("employee_id").required().min(1))
        .field(FieldSpec::text("title").max_length(100))
        .field(FieldSpec::text("title_of_courtesy").max_length(25))
        .field(FieldSpec::date("dob"))
        .field(FieldSpec::date("hire_date"))
        .field(FieldSpec::text("address").max_length(255))
        .field(FieldSpec::text("city").max_length(100))
        .field(FieldSpec::text("region").max_length(100))
        .field(FieldSpec::text("postal_code").max_length(20))
        .field(FieldSpec::text("country").max_length(100))
        .field(FieldSpec::text("home_phone").max_length(50))
        .field(FieldSpec::text("extension").max_length(10))
        .field(FieldSpec::text("notes"))
        .reference(ReferenceSpec::new("user_email", "user", "users").unique())
        .reference(ReferenceSpec::new("reports_to", "reports_to", "employees").deferred())
}

fn employee_territories() -> EntitySchema {
    EntitySchema::new("employee_territories")
        .key(&["employee", "territory"])
        .reference(ReferenceSpec::new("employee_id", "employee", "employees").required())
        .reference(ReferenceSpec::new("territory_id", "territory", "territories").required())
}

fn categories() -> EntitySchema {
    EntitySchema::new("categories")
        .key(&["category_id"])
        .field(FieldSpec::integer("category_id").required())
        .field(FieldSpec::text("category_name").required().max_length(255))
        .field(FieldSpec::text("description"))
}

fn suppliers() -> EntitySchema {
    EntitySchema::new("suppliers")
        .key(&["supplier_id"])
        .field(FieldSpec::integer("supplier_id").required())
        .field(FieldSpec::text("company_name").required().max_length(255))
        .field(FieldSpec::text("contact_name").max_length(255))
        .field(FieldSpec::text("contact_title").max_length(100))
        .field(FieldSpec::text("address").max_length(255))
        .field(FieldSpec::text("city").max_length(100))
        .field(FieldSpec::text("region").max_length(100))
        .field(FieldSpec::text("postal_code").max_length(20))
        .field(FieldSpec::text("country").max_length(100))
        .field(FieldSpec::text("phone").max_length(50))
}

fn shippers() -> EntitySchema {
    EntitySchema::new("shippers")
        .key(&["shipper_id"])
        .field(FieldSpec::integer("shipper_id").required())
        .field(FieldSpec::text("company_name").required().max_length(255))
        .field(FieldSpec::text("phone").max_length(50))
}

fn products() -> EntitySchema {
    EntitySchema::new("products")
        .key(&["product_id"])
        .field(FieldSpec::integer("product_id").required())
        .field(FieldSpec::text("product_name").required().max_length(255))
        .field(FieldSpec::text("quantity_per_unit").max_length(100))
        .field(FieldSpec::decimal("unit_price").min(0).digits(10, 2))
        .field(FieldSpec::integer("units_in_stock").min(0).default_value(0_i64))
        .field(FieldSpec::integer("units_on_order").min(0).default_value(0_i64))
        .field(FieldSpec::integer("reorder_level").min(0).default_value(0_i64))
        .field(FieldSpec::boolean("discontinued").default_value(false))
        .reference(ReferenceSpec::new("supplier_id", "supplier", "suppliers"))
        .reference(ReferenceSpec::new("category_id", "category", "categories"))
}

fn orders() -> EntitySchema {
    EntitySchema::new("orders")
        .key(&["order_id"])
        .field(FieldSpec::integer("order_id").required())
        .field(FieldSpec::datetime("order_date"))
        .field(FieldSpec::datetime("required_date"))
        .field(FieldSpec::datetime("shipped_date"))
        .field(FieldSpec::decimal("freight").min(0).digits(10, 2))
        .field(FieldSpec::text("ship_name").max_length(255))
        .field(FieldSpec::text("ship_address").max_length(255))
        .field(FieldSpec::text("ship_city").max_length(100))
        .field(FieldSpec::text("ship_region").max_length(100))
        .field(FieldSpec::text("ship_postal_code").max_length(20))
        .field(FieldSpec::text("ship_country").max_length(100))
        .reference(ReferenceSpec::new("customer_id", "customer", "customers"))
        .reference(ReferenceSpec::new("employee_id", "employee", "employees"))
        .reference(ReferenceSpec::new("ship_via", "ship_via", "shippers"))
}

fn order_details() -> EntitySchema {
    EntitySchema::new("order_details")
        .key(&["order", "product"])
        .field(
            FieldSpec::decimal("unit_price")
                .min(0)
                .digits(10, 2)
                .fallback("product", "unit_price", rust_decimal::Decimal::ZERO),
        )
        .field(FieldSpec::integer("quantity").required().min(1))
        .field(
            FieldSpec::decimal("discount")
                .min(0)
                .max(1)
                .digits(4, 2)
                .default_value(rust_decimal::Decimal::ZERO),
        )
        .reference(ReferenceSpec::new("order_id", "order", "orders").required())
        .reference(ReferenceSpec::new("product_id", "product", "products").required())
}
