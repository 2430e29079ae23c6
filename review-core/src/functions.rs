//! Built-in rule functions, carried over from the original source's
//! worked examples of the function-registry contract.

use serde_json::Value;

use crate::registry::FunctionRegistry;

const URL_PATTERN: &str = r"https?://[^\s]+";

/// Register `text_length`, `keyword_count`, and `has_url` on `registry`.
pub fn register_builtins(registry: &FunctionRegistry) {
    registry
        .register("text_length", |object, _args, _kwargs| {
            Some(Value::from(object.text().chars().count()))
        })
        .expect("text_length registered twice");

    registry
        .register("keyword_count", |object, args, _kwargs| {
            let full_text = object.full_text();
            let count: usize = args
                .iter()
                .filter_map(Value::as_str)
                .map(|kw| full_text.matches(kw).count())
                .sum();
            Some(Value::from(count))
        })
        .expect("keyword_count registered twice");

    registry
        .register("has_url", |object, _args, _kwargs| {
            let re = regex::Regex::new(URL_PATTERN).expect("static URL pattern is valid");
            Some(Value::from(re.is_match(&object.full_text())))
        })
        .expect("has_url registered twice");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{Author, ContentObject, Post};

    fn post(text: &str) -> ContentObject {
        ContentObject::Post(Post {
            id: 1,
            fid: 1,
            tid: 1,
            text: text.to_string(),
            author: Author {
                id: 1,
                name: "a".into(),
                level: 1,
                portrait: None,
            },
            create_time: 0,
        })
    }

    #[test]
    fn has_url_detects_link() {
        let registry = FunctionRegistry::new();
        register_builtins(&registry);
        let f = registry.get("has_url").unwrap();
        let obj = post("check out http://example.com now");
        assert_eq!(f(&obj, &[], &Default::default()), Some(Value::Bool(true)));
        let obj2 = post("no links here");
        assert_eq!(f(&obj2, &[], &Default::default()), Some(Value::Bool(false)));
    }

    #[test]
    fn keyword_count_sums_all_keywords() {
        let registry = FunctionRegistry::new();
        register_builtins(&registry);
        let f = registry.get("keyword_count").unwrap();
        let obj = post("spam spam eggs");
        let args = vec![Value::from("spam"), Value::from("eggs")];
        assert_eq!(f(&obj, &args, &Default::default()), Some(Value::from(3)));
    }
}
