//! Built-in campus catalogue used when `store = "memory"`.
//!
//! Every building sits within a few hundred metres of the default simulated
//! position so `/navigate` produces readable distances straight away.

use waymark_content::{Document, FieldValue, InMemoryStore};

/// `(id, name, description, latitude, longitude)`
const BUILDINGS: &[(&str, &str, &str, f64, f64)] = &[
    (
        "biblioteca",
        "Biblioteca Central",
        "Salas de estudio, hemeroteca y préstamo de libros.",
        13.7200,
        -89.2000,
    ),
    (
        "edificio-a",
        "Edificio A",
        "Aulas de ingeniería y laboratorios de cómputo.",
        13.7175,
        -89.2052,
    ),
    (
        "cafeteria",
        "Cafetería",
        "Comedor principal, abierto de 7:00 a 19:00.",
        13.7190,
        -89.2060,
    ),
    (
        "auditorio",
        "Auditorio Central",
        "Conferencias, graduaciones y eventos culturales.",
        13.7162,
        -89.2025,
    ),
    (
        "rectoria",
        "Rectoría",
        "Administración académica y atención a estudiantes.",
        13.7188,
        -89.2031,
    ),
];

/// Catalogue seeded into `collection`.  Also carries one document without
/// coordinates (`info`) so the non-navigable path can be exercised.
pub fn campus_store(collection: &str) -> InMemoryStore {
    let store = BUILDINGS
        .iter()
        .fold(InMemoryStore::new(), |store, (id, name, desc, lat, lon)| {
            store.with_place(collection, id, name, desc, *lat, *lon)
        });
    store.insert(
        collection,
        "info",
        Document::from([
            ("name".to_string(), FieldValue::from("Punto de Información")),
            (
                "description".to_string(),
                FieldValue::from("Mapas impresos y objetos perdidos."),
            ),
        ]),
    );
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use waymark_content::DocumentStore;

    #[tokio::test]
    async fn catalogue_lists_every_building() {
        let store = campus_store("buildingLocations");
        let docs = store.list_documents("buildingLocations").await.unwrap();
        assert_eq!(docs.len(), BUILDINGS.len() + 1);

        let library = store
            .get_document("buildingLocations", "biblioteca")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(library["name"].as_str(), Some("Biblioteca Central"));
        assert_eq!(library["latitude"].as_f64(), Some(13.72));
    }

    #[tokio::test]
    async fn info_desk_has_no_coordinates() {
        let store = campus_store("campus");
        let info = store.get_document("campus", "info").await.unwrap().unwrap();
        assert!(!info.contains_key("latitude"));
        assert!(store.get_document("buildingLocations", "info").await.unwrap().is_none());
    }
}
