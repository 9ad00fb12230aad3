/*!
# LanHealth Kernel

API d'ingestion de télémétrie pour les appareils du réseau local :
chaque appareil pousse son rapport (CPU, RAM, température, statut, score),
le kernel garde le dernier par appareil et le sert tant qu'il est frais.
*/

pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod state;
