use std::path::{Path, PathBuf};

use osc_adapters::{DetailParser, DetailSource, DirectoryDetailSource};
use osc_core::EntityId;

fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .join("fixtures")
        .join("mapaosc")
}

async fn parse_fixture(id: u64) -> osc_core::EntityRecord {
    let source = DirectoryDetailSource::new(fixtures_dir());
    let html = source
        .fetch_detail(EntityId(id))
        .await
        .expect("fixture page");
    DetailParser::new().expect("parser").parse(EntityId(id), &html)
}

#[tokio::test]
async fn icon_font_page_yields_every_field() {
    let record = parse_fixture(547149).await;

    assert_eq!(record.id, EntityId(547149));
    assert_eq!(record.name, "Associação de Moradores do Jardim das Américas");
    assert_eq!(record.email, "contato@amja.org.br");
    assert_eq!(record.phone, "(41) 3266-1020");
    assert_eq!(record.address, "Rua Francisco H. dos Santos, 210 - Jardim das Américas");
    assert_eq!(record.legal_nature, "Associação Privada");
    assert_eq!(record.registration_status, "Ativa");
    assert_eq!(record.raw_municipality_name, "");
}

#[tokio::test]
async fn svg_icon_page_with_loose_labels() {
    let record = parse_fixture(538421).await;

    assert_eq!(record.name, "INSTITUTO PARANAENSE DE CEGOS");
    assert_eq!(record.email, "");
    assert_eq!(record.phone, "+55 (44) 3025-7788");
    assert_eq!(record.address, "Avenida Visconde de Guarapuava, 1020");
    assert_eq!(record.legal_nature, "Fundação Privada");
    assert_eq!(record.registration_status, "Baixada");
}

#[tokio::test]
async fn page_without_values_is_blank() {
    let source = DirectoryDetailSource::new(fixtures_dir());
    let html = tokio::fs::read_to_string(fixtures_dir().join("detail_sparse.html"))
        .await
        .expect("sparse fixture");
    let record = DetailParser::new().expect("parser").parse(EntityId(1), &html);

    assert!(record.is_blank(), "unexpected values: {record:?}");
    assert!(source.detail_url(EntityId(1)).ends_with("detail_1.html"));
}

#[tokio::test]
async fn missing_saved_page_is_an_error() {
    let source = DirectoryDetailSource::new(fixtures_dir());
    assert!(source.fetch_detail(EntityId(999_999_999)).await.is_err());
}
