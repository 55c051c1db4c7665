pub mod flow; 
pub mod stream; 
pub mod error; 

pub use self::flow::FlowKey; 
pub use self::stream::{HalfConnectionFeed, HalfConnectionStream, half_connection}; 
pub use self::error::{ConnectionError, Result}; 
