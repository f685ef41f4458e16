//! Shop-domain fixtures: products with categories, orders with customers
//! and regions, and a self-referential employee hierarchy. Orders carry
//! virtual expression fields reaching through their relations; products
//! carry a computed relation projection.

use trellis::prelude::*;

pub const SHOP_DDL: &str = r#"
CREATE TABLE "Category" (
    id INTEGER PRIMARY KEY,
    name TEXT
);
CREATE TABLE "Product" (
    id INTEGER PRIMARY KEY,
    name TEXT,
    category_id INTEGER
);
CREATE TABLE "Region" (
    id INTEGER PRIMARY KEY,
    name TEXT
);
CREATE TABLE "Customer" (
    id INTEGER PRIMARY KEY,
    name TEXT,
    city TEXT,
    region_id INTEGER
);
CREATE TABLE "Order" (
    id INTEGER PRIMARY KEY,
    total INTEGER,
    note TEXT,
    customer_id INTEGER
);
CREATE TABLE "Employee" (
    id INTEGER PRIMARY KEY,
    name TEXT,
    manager_id INTEGER
);
"#;

pub fn shop_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .register(
            EntityDef::new("Category", "Category")
                .field(FieldDef::new("id", "id"))
                .field(FieldDef::new("name", "name")),
        )
        .unwrap();
    schema
        .register(
            EntityDef::new("Product", "Product")
                .field(FieldDef::new("id", "id"))
                .field(FieldDef::new("name", "name"))
                .field(FieldDef::new("categoryId", "category_id"))
                .field(FieldDef::new("categoryName", "category_name").projects("category", "name"))
                .relation(RelationDef::to_one("category", "categoryId", "Category")),
        )
        .unwrap();
    schema
        .register(
            EntityDef::new("Region", "Region")
                .field(FieldDef::new("id", "id"))
                .field(FieldDef::new("name", "name")),
        )
        .unwrap();
    schema
        .register(
            EntityDef::new("Customer", "Customer")
                .field(FieldDef::new("id", "id"))
                .field(FieldDef::new("name", "name"))
                .field(FieldDef::new("city", "city"))
                .field(FieldDef::new("regionId", "region_id"))
                .field(FieldDef::new("regionName", "region_name").with_template("{region.name}"))
                .relation(RelationDef::to_one("region", "regionId", "Region")),
        )
        .unwrap();
    schema
        .register(
            EntityDef::new("Order", "Order")
                .field(FieldDef::new("id", "id"))
                .field(FieldDef::new("total", "total"))
                .field(FieldDef::new("note", "note"))
                .field(FieldDef::new("customerId", "customer_id"))
                .field(
                    FieldDef::new("customerCity", "customer_city")
                        .with_template("{customer.city}"),
                )
                .field(
                    FieldDef::new("customerRegion", "customer_region")
                        .with_template("{customer.regionName}"),
                )
                .relation(RelationDef::to_one("customer", "customerId", "Customer")),
        )
        .unwrap();
    schema
        .register(
            EntityDef::new("Employee", "Employee")
                .field(FieldDef::new("id", "id"))
                .field(FieldDef::new("name", "name"))
                .field(FieldDef::new("managerId", "manager_id"))
                .relation(RelationDef::to_one("manager", "managerId", "Employee")),
        )
        .unwrap();
    schema.validate().unwrap();
    schema
}

/// Three customers across two cities, four orders.
pub const SHOP_SEED: &str = r#"
INSERT INTO "Region" (id, name) VALUES (1, 'East'), (2, 'West');
INSERT INTO "Customer" (id, name, city, region_id) VALUES
    (1, 'Acme', 'NYC', 1),
    (2, 'Globex', 'NYC', 1),
    (3, 'Initech', 'Austin', 2);
INSERT INTO "Order" (id, total, note, customer_id) VALUES
    (1, 50, 'rush delivery', 1),
    (2, 120, NULL, 2),
    (3, 75, 'gift wrap', 3),
    (4, 200, 'New York pickup', 1);
"#;
