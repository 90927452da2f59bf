use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// Nosso tipo de erro, com `thiserror` para melhor ergonomia.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Erro de validação")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Código de barras malformado: {0}")]
    MalformedBarcode(String),

    #[error("Boleto já liquidado")]
    AlreadySettled,

    #[error("Boleto não encontrado")]
    BoletoNotFound,

    // Segunda confirmação concorrente para a mesma transação é rejeitada,
    // nunca mesclada com a que está em andamento.
    #[error("Já existe uma confirmação em andamento para esta transação")]
    ConfirmationInProgress,

    // Falha ao vincular a identidade à sessão do banco: aborta tudo.
    // Nunca degrada silenciosamente para acesso sem escopo.
    #[error("Falha ao vincular o contexto do tenant à sessão")]
    TenantBinding(#[source] sqlx::Error),

    // Nunca propagado ao chamador; o AuditService o engole e loga.
    #[error("Falha ao gravar entrada de auditoria")]
    AuditWrite(#[source] sqlx::Error),

    #[error("Credenciais inválidas")]
    InvalidCredentials,

    #[error("Token inválido")]
    InvalidToken,

    // Variante para erros de banco de dados (sqlx)
    #[error("Erro de banco de dados")]
    DatabaseError(#[from] sqlx::Error),

    // Variante genérica para qualquer outro erro inesperado
    #[error("Erro interno do servidor")]
    InternalServerError(#[from] anyhow::Error),

    #[error("Erro de Bcrypt: {0}")]
    BcryptError(#[from] bcrypt::BcryptError),

    #[error("Erro de JWT: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::ValidationError(errors) => {
                let mut details = std::collections::HashMap::new();
                for (field, field_errors) in errors.field_errors() {
                    let messages: Vec<String> = field_errors
                        .iter()
                        .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
                        .collect();
                    details.insert(field.to_string(), messages);
                }
                let body = Json(json!({
                    "error": "Um ou mais campos são inválidos.",
                    "details": details,
                }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            }

            AppError::MalformedBarcode(detail) => {
                let body = Json(json!({
                    "error": "Código de barras inválido.",
                    "details": detail,
                }));
                return (StatusCode::BAD_REQUEST, body).into_response();
            }

            AppError::AlreadySettled => (StatusCode::CONFLICT, "Este boleto já foi pago."),
            AppError::BoletoNotFound => (StatusCode::NOT_FOUND, "Boleto não encontrado."),
            AppError::ConfirmationInProgress => (
                StatusCode::CONFLICT,
                "Já existe uma confirmação em andamento para esta transação.",
            ),
            AppError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "E-mail ou senha inválidos."),
            AppError::InvalidToken => (
                StatusCode::UNAUTHORIZED,
                "Token de autenticação inválido ou ausente.",
            ),

            // Falha de binding RLS aborta a operação inteira.
            ref e @ AppError::TenantBinding(_) => {
                tracing::error!("Falha de vínculo do tenant (fail closed): {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Não foi possível estabelecer o escopo de acesso.",
                )
            }

            // Todos os outros erros (DatabaseError, InternalServerError) viram 500.
            // O `tracing` vai logar a mensagem detalhada que `thiserror` nos deu.
            ref e => {
                tracing::error!("Erro Interno do Servidor: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Ocorreu um erro inesperado.")
            }
        };

        // Resposta padrão para erros simples que só têm uma mensagem.
        let body = Json(json!({ "error": error_message }));
        (status, body).into_response()
    }
}
