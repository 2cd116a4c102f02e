pub mod json;

use crate::model::Uri;

pub fn ctx() -> Uri {
    Uri::default_context()
}
