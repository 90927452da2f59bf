// Núcleo de autorização e liquidação de pagamentos: decodificação de
// boletos, cálculo de multa/juros/desconto, gate de confirmação por voz e
// biometria, sessões de banco escopadas por tenant e trilha de auditoria.

pub mod common;
pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
