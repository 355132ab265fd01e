//! Shared fixtures for unit tests: a small device catalog that exercises
//! inheritance, abstract destinations, inverse pairs and processing flags.

use crate::{
    model::{AttributeModel, EntityDef, RelationModel, Schema, ScalarKind},
    record::RawRecord,
    store::MemoryStore,
};
use serde_json::Value as JsonValue;
use std::sync::Arc;

fn common() -> [AttributeModel; 3] {
    [
        AttributeModel::new("id", ScalarKind::Int64),
        AttributeModel::new("uuid", ScalarKind::String),
        AttributeModel::new("disabled", ScalarKind::Boolean),
    ]
}

fn name() -> AttributeModel {
    AttributeModel::new("name", ScalarKind::String)
}

/// Device catalog used across the crate's unit tests.
pub(crate) fn fixture_schema() -> Schema {
    Schema::builder()
        .entity(
            EntityDef::new("Organization")
                .attributes(common())
                .attribute(name())
                .relation(RelationModel::to_many("contracts", "Contract").inverse("organization")),
        )
        .entity(
            EntityDef::new("Contract")
                .attributes(common())
                .attribute(AttributeModel::new("value", ScalarKind::Decimal))
                .attribute(
                    AttributeModel::new("startsOn", ScalarKind::Date).external_name("startDate"),
                )
                .relation(
                    RelationModel::to_one("organization", "Organization").inverse("contracts"),
                ),
        )
        .entity(
            EntityDef::new("DeviceType")
                .attributes(common())
                .attribute(name())
                .relation(RelationModel::to_many("devices", "Device").inverse("type"))
                .relation(
                    RelationModel::to_many("attributes", "DeviceTypeAttribute")
                        .inverse("deviceType"),
                ),
        )
        .entity(
            EntityDef::new("Device")
                .attributes(common())
                .attribute(name())
                .attribute(AttributeModel::new("created", ScalarKind::Date))
                .attribute(AttributeModel::new("weight", ScalarKind::Double))
                .attribute(AttributeModel::new("slot", ScalarKind::Int16))
                .relation(RelationModel::to_one("type", "DeviceType").inverse("devices"))
                .relation(
                    RelationModel::to_one("location", "Location")
                        .inverse("device")
                        .without_identity(),
                )
                .relation(RelationModel::to_one("parent", "Device").inverse("children"))
                .relation(RelationModel::to_many("children", "Device").inverse("parent"))
                .relation(RelationModel::to_many("readings", "Reading").without_identity())
                .relation(RelationModel::to_one("owner", "User").ignored()),
        )
        .entity(
            EntityDef::new("Location")
                .attribute(AttributeModel::new("uuid", ScalarKind::String))
                .attribute(AttributeModel::new("latitude", ScalarKind::Double))
                .attribute(AttributeModel::new("longitude", ScalarKind::Double))
                .relation(RelationModel::to_one("device", "Device").inverse("location")),
        )
        .entity(
            EntityDef::new("Reading")
                .attribute(AttributeModel::new("value", ScalarKind::Float))
                .attribute(AttributeModel::new("takenAt", ScalarKind::Date)),
        )
        .entity(
            EntityDef::new("AbstractAttribute")
                .abstract_entity()
                .attributes(common())
                .attribute(name()),
        )
        .entity(
            EntityDef::new("DeviceAttribute")
                .parent("AbstractAttribute")
                .attribute(AttributeModel::new("unit", ScalarKind::String)),
        )
        .entity(
            EntityDef::new("SRAttribute")
                .parent("AbstractAttribute")
                .attribute(AttributeModel::new("code", ScalarKind::String)),
        )
        .entity(
            EntityDef::new("DeviceTypeAttribute")
                .attributes(common())
                .relation(
                    RelationModel::to_one("deviceType", "DeviceType").inverse("attributes"),
                )
                .relation(RelationModel::to_one("attribute", "AbstractAttribute")),
        )
        .entity(
            EntityDef::new("AttributeValue")
                .attributes(common())
                .attribute(AttributeModel::new("value", ScalarKind::String))
                .relation(RelationModel::to_one("attribute", "AbstractAttribute")),
        )
        .entity(
            EntityDef::new("User")
                .attributes(common())
                .attribute(name())
                .attribute(AttributeModel::new("avatar", ScalarKind::Binary))
                .attribute(AttributeModel::new("settings", ScalarKind::Transformable)),
        )
        .build()
        .expect("fixture schema should validate")
}

pub(crate) fn fixture_store() -> MemoryStore {
    MemoryStore::new(Arc::new(fixture_schema()))
}

/// Build a raw record from a `json!` object literal.
pub(crate) fn record(value: JsonValue) -> RawRecord {
    value
        .as_object()
        .cloned()
        .expect("test record should be an object")
}
