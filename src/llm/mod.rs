pub mod gateway;
pub mod openai_compat;
pub mod provider;
pub mod types;

pub use gateway::{GenerationGateway, TokenStream};
pub use openai_compat::{OpenAiChat, OpenAiCompatClient, OpenAiEmbeddings};
pub use provider::GenerationService;
pub use types::{ChatMessage, SamplingParams};
