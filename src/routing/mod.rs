//! URL construction and parsing for application routes.

mod core;

pub use self::core::{
    AppUrlParser, BasePath, ParsedAppUrl, RemoveSlashes, RouteTableParser, append_app_path,
    parse_app_url, relative_to_absolute, remove_slashes,
};
