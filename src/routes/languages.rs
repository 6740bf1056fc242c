use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;

use super::ErrorResponseWithMessage;
use crate::config::LanguageCatalog;

/// Public view of a catalog entry; commands stay internal
#[derive(Serialize)]
pub struct LanguageSummary {
    pub id: i32,
    pub name: String,
    pub version: String,
}

#[get("/languages/")]
pub async fn list_languages_handler(catalog: web::Data<LanguageCatalog>) -> impl Responder {
    let languages: Vec<LanguageSummary> = catalog
        .list()
        .into_iter()
        .map(|language| LanguageSummary {
            id: language.id,
            name: language.name.clone(),
            version: language.version.clone(),
        })
        .collect();

    HttpResponse::Ok().json(languages)
}

#[get("/languages/{id}")]
pub async fn get_language_handler(
    catalog: web::Data<LanguageCatalog>,
    path: web::Path<(i32,)>,
) -> impl Responder {
    let language_id = path.into_inner().0;

    match catalog.get(language_id) {
        Some(language) => HttpResponse::Ok().json(LanguageSummary {
            id: language.id,
            name: language.name.clone(),
            version: language.version.clone(),
        }),
        None => HttpResponse::NotFound().json(ErrorResponseWithMessage {
            reason: "ERR_NOT_FOUND",
            code: 3,
            message: format!("Language {language_id} not found."),
        }),
    }
}
