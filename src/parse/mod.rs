pub mod node_parser;
pub mod node_serializer;
pub mod wikilink;

pub use node_parser::{DUE_FORMAT, HeaderError, ParsedNode, parse_due, parse_node};
pub use node_serializer::{format_instant, serialize_node};
pub use wikilink::{extract_wikilinks, links_to};
