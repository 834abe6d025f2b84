pub mod browser;
pub mod browser_renderer;
pub mod extract;
pub mod guard;
pub mod http_renderer;
pub mod llm;
pub mod page;

pub use browser::{BrowserSession, BrowserSettings};
pub use browser_renderer::BrowserRenderer;
pub use extract::LlmExtractor;
pub use http_renderer::HttpRenderer;
pub use llm::{LlmConfig, OpenAiBackend, Provider};
pub use page::PageView;
