//! Errores tipados en las fronteras del sistema (API remota, fetcher,
//! capa de extracción y pipeline). El resto de la aplicación usa `anyhow`.

use thiserror::Error;

/// Fallos de la API remota de repositorios, distinguibles entre sí para que el
/// fetcher pueda decidir entre fallo total y omisión de un elemento.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("No encontrado: {0}")]
    NotFound(String),

    #[error("Límite de peticiones alcanzado (reset: {reset:?})")]
    RateLimited { reset: Option<u64> },

    #[error("No autorizado")]
    Unauthorized,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Error de transporte: {0}")]
    Transport(String),

    #[error("Respuesta no decodificable: {0}")]
    Decode(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Identificador de repositorio no válido: {0}")]
    InvalidIdentifier(String),

    #[error("Repositorio remoto no disponible: {0}")]
    RemoteUnavailable(RemoteError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("No se encontró ningún bloque estructurado ({0})")]
    NoStructuredBlockFound(&'static str),

    #[error("No se pudo decodificar la respuesta: {0}")]
    Decode(String),

    #[error("La respuesta no contiene registros utilizables ({0})")]
    NoUsableRecords(&'static str),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Identificador de repositorio no válido: {0}")]
    InvalidIdentifier(String),

    #[error("No se pudieron obtener ficheros: {0}")]
    FetchFailed(String),

    #[error("Falta el campo requerido '{0}' en el contexto del pipeline")]
    MissingField(&'static str),
}
