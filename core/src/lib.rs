pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod session;
pub mod storage;
pub mod stream;
pub mod telemetry;

pub use config::ClientConfig;
pub use credentials::{Credential, CredentialStore, User};
pub use error::ClientError;
pub use gateway::{AuthGateway, LoginRequest, RegisterRequest, ReqwestExchange, SessionEvent};
pub use session::{ChatSession, ChatStats, ConversationTurn, SessionPhase, TurnRole, TurnStatus};
pub use stream::{ChunkSource, ScriptedChunkSource, SseChunkSource, StreamEvent};
