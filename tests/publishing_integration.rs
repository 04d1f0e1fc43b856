use std::sync::Arc;

use serde_json::json;

use appdata::{
    new_registry, DataType, FieldDef, FieldValue, ForeignKeyDef, FormData, FormOpts, FormSchema,
    MemoryStore, MultiFormDef, MultiFormSetDef, Record, RecordMeta, RecordStore, RecordType,
    SharedRegistry,
};

fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

// Publishing domain: articles inherit publishable behavior, authors hang off
// articles through a foreign key.
struct Publishing {
    registry: SharedRegistry,
    article: Arc<RecordMeta>,
    author: Arc<RecordMeta>,
}

impl Publishing {
    fn set_up() -> Self {
        init_logging();
        let registry = new_registry(None);
        {
            let mut guard = registry.write();
            guard
                .register(
                    "publish",
                    Arc::new(FormSchema::new(
                        "publish",
                        vec![
                            FieldDef::new("publish_from", DataType::Date),
                            FieldDef::new("publish_to", DataType::Date).required(false),
                            FieldDef::new("published", DataType::Boolean).required(false),
                        ],
                    )),
                    Some("publishable"),
                    false,
                )
                .unwrap();
            guard
                .register(
                    "rss",
                    Arc::new(FormSchema::new(
                        "rss",
                        vec![
                            FieldDef::new("title", DataType::String),
                            FieldDef::new("author", DataType::String).required(false),
                        ],
                    )),
                    Some("article"),
                    false,
                )
                .unwrap();
            guard
                .register(
                    "personal",
                    Arc::new(FormSchema::new(
                        "personal",
                        vec![FieldDef::new("born", DataType::Date).required(false)],
                    )),
                    Some("author"),
                    false,
                )
                .unwrap();
        }

        let article = Arc::new(RecordMeta::new(
            RecordType::with_ancestors("article", &["publishable"]),
            FormSchema::new(
                "article",
                vec![FieldDef::new("title", DataType::String).max_length(200)],
            ),
        ));
        let author = Arc::new(
            RecordMeta::new(
                RecordType::new("author"),
                FormSchema::new("author", vec![FieldDef::new("name", DataType::String)]),
            )
            .with_foreign_keys(vec![ForeignKeyDef {
                name: "publishable".to_string(),
                target: "publishable".to_string(),
                unique: false,
            }]),
        );

        Self {
            registry,
            article,
            author,
        }
    }

    fn article_form_def(&self) -> MultiFormDef {
        let mut def = MultiFormDef::new(self.article.clone());
        def.add_form("publish", FormOpts::all());
        def.add_form("rss", FormOpts::fields(&["title"]));
        def
    }
}

#[test]
fn test_publishing_workflow_end_to_end() {
    let env = Publishing::set_up();
    let store = MemoryStore::new();
    let def = env.article_form_def();

    // Create an article through the composite form. The publish namespace is
    // registered for the "publishable" ancestor and resolves for articles.
    let data: FormData = [
        ("title".to_string(), json!("Hello world")),
        ("publish-publish_from".to_string(), json!("2020-01-01")),
        ("publish-published".to_string(), json!(true)),
        ("rss-title".to_string(), json!("Hello (feed)")),
    ]
    .into();
    let mut form = def.bind(&env.registry, Some(data), None, None).unwrap();
    assert!(form.is_valid(), "errors: {:?}", form.errors());
    let id = form.save(&store).unwrap().id.clone().unwrap();

    // Reload and read typed values out of both namespaces.
    let mut article = store
        .load(&env.article, &env.registry, &id)
        .unwrap()
        .unwrap();
    assert_eq!(
        article.value("title"),
        Some(&FieldValue::Str("Hello world".to_string()))
    );
    let publish = article.app_data.namespace("publish").unwrap();
    assert_eq!(publish.get("published").unwrap(), FieldValue::Bool(true));
    assert!(matches!(
        publish.get("publish_from").unwrap(),
        FieldValue::Date(_)
    ));
    // publish_to was never submitted and is stored as an explicit null
    assert_eq!(publish.get("publish_to").unwrap(), FieldValue::Null);
    let rss = article.app_data.namespace("rss").unwrap();
    assert_eq!(
        rss.get("title").unwrap(),
        FieldValue::Str("Hello (feed)".to_string())
    );

    // Update through a bound form on the existing record.
    let update: FormData = [
        ("title".to_string(), json!("Hello world")),
        ("publish-publish_from".to_string(), json!("2020-01-01")),
        ("publish-publish_to".to_string(), json!("2021-06-30")),
        ("rss-title".to_string(), json!("Hello (feed)")),
    ]
    .into();
    let mut form = def
        .bind(&env.registry, Some(update), Some(article), None)
        .unwrap();
    assert_eq!(form.changed_data(), vec!["publish.publish_to".to_string()]);
    assert!(form.is_valid());
    form.save(&store).unwrap();

    let mut reloaded = store
        .load(&env.article, &env.registry, &id)
        .unwrap()
        .unwrap();
    let publish = reloaded.app_data.namespace("publish").unwrap();
    assert!(matches!(
        publish.get("publish_to").unwrap(),
        FieldValue::Date(_)
    ));
}

#[test]
fn test_validation_errors_per_namespace() {
    let env = Publishing::set_up();
    let def = env.article_form_def();

    let data: FormData = [
        ("title".to_string(), json!("No publish date")),
        ("rss-title".to_string(), json!("")),
    ]
    .into();
    let mut form = def.bind(&env.registry, Some(data), None, None).unwrap();

    assert!(!form.is_valid());
    let errors = form.errors();
    assert_eq!(
        errors.get("publish.publish_from"),
        Some(&vec!["This field is required.".to_string()])
    );
    assert_eq!(
        errors.get("rss.title"),
        Some(&vec!["This field is required.".to_string()])
    );
    assert!(errors.get("title").is_none());
}

#[test]
fn test_author_formset_inline_under_article() {
    let env = Publishing::set_up();
    let store = MemoryStore::new();

    // Create the parent article first.
    let mut article = Record::new(env.article.clone(), env.registry.clone());
    article.set_value("title", FieldValue::Str("With authors".into()));
    let article_id = store.upsert(&mut article).unwrap();

    let author_def = MultiFormDef::new(env.author.clone());
    let set_def = MultiFormSetDef::inline(&env.article, author_def, None)
        .unwrap()
        .extra(3);

    let data: FormData = [
        ("form-0-name".to_string(), json!("First Author")),
        ("form-1-name".to_string(), json!("Second Author")),
    ]
    .into();
    // binding against no existing rows; the third extra row stays blank
    let mut set = set_def
        .bind(&env.registry, Some(&data), Vec::new())
        .unwrap();
    assert!(set.is_valid());
    let saved = set.save(&store, Some(&article_id)).unwrap();
    assert_eq!(saved.len(), 2);

    let fk = env.author.foreign_keys[0].clone();
    let authors = store
        .list_related(&env.author, &env.registry, &fk, &article_id)
        .unwrap();
    let names: Vec<_> = authors
        .iter()
        .filter_map(|a| a.value("name"))
        .cloned()
        .collect();
    assert!(names.contains(&FieldValue::Str("First Author".into())));
    assert!(names.contains(&FieldValue::Str("Second Author".into())));

    // Delete one author through a re-bound formset.
    let first_id = authors[0].id.clone().unwrap();
    let delete_data: FormData = [
        (
            "form-0-name".to_string(),
            json!(match authors[0].value("name").unwrap() {
                FieldValue::Str(s) => s.clone(),
                _ => unreachable!(),
            }),
        ),
        ("form-0-DELETE".to_string(), json!("on")),
        (
            "form-1-name".to_string(),
            json!(match authors[1].value("name").unwrap() {
                FieldValue::Str(s) => s.clone(),
                _ => unreachable!(),
            }),
        ),
    ]
    .into();
    let mut set = set_def
        .bind(&env.registry, Some(&delete_data), authors)
        .unwrap();
    assert!(set.is_valid());
    set.save(&store, Some(&article_id)).unwrap();

    assert!(store
        .load(&env.author, &env.registry, &first_id)
        .unwrap()
        .is_none());
    let remaining = store
        .list_related(&env.author, &env.registry, &fk, &article_id)
        .unwrap();
    assert_eq!(remaining.len(), 1);
}

#[test]
fn test_unknown_namespace_survives_save_and_reload() {
    let env = Publishing::set_up();
    let store = MemoryStore::new();

    let mut article = Record::new(env.article.clone(), env.registry.clone());
    article.set_value("title", FieldValue::Str("Legacy".into()));
    article
        .app_data
        .insert("legacy_plugin", json!({"counter": 41, "tags": ["a", "b"]}))
        .unwrap();
    let id = store.upsert(&mut article).unwrap();

    let mut reloaded = store.load(&env.article, &env.registry, &id).unwrap().unwrap();
    assert_eq!(
        reloaded.app_data.get_raw("legacy_plugin"),
        Some(json!({"counter": 41, "tags": ["a", "b"]}))
    );
    // a second save round-trips the unknown payload untouched
    store.upsert(&mut reloaded).unwrap();
    let twice = store.load(&env.article, &env.registry, &id).unwrap().unwrap();
    assert_eq!(
        twice.app_data.get_raw("legacy_plugin"),
        Some(json!({"counter": 41, "tags": ["a", "b"]}))
    );
}

#[test]
fn test_per_type_registration_does_not_leak_across_types() {
    let env = Publishing::set_up();

    // "rss" is registered for articles only; an author record cannot see it.
    let mut author = Record::new(env.author.clone(), env.registry.clone());
    assert!(author.app_data.namespace("rss").is_err());
    assert!(author.app_data.namespace("personal").is_ok());

    // "publish" resolves for articles through the publishable ancestor.
    let mut article = Record::new(env.article.clone(), env.registry.clone());
    assert!(article.app_data.namespace("publish").is_ok());
}

#[test]
fn test_alternate_registry_is_isolated_from_the_shared_one() {
    let env = Publishing::set_up();

    let alternate = new_registry(None);
    alternate
        .write()
        .register(
            "experimental",
            Arc::new(FormSchema::new(
                "experimental",
                vec![FieldDef::new("flag", DataType::Boolean).required(false)],
            )),
            None,
            false,
        )
        .unwrap();

    let mut isolated = Record::new(env.article.clone(), alternate);
    assert!(isolated.app_data.namespace("experimental").is_ok());
    assert!(isolated.app_data.namespace("publish").is_err());

    let mut shared = Record::new(env.article.clone(), env.registry.clone());
    assert!(shared.app_data.namespace("experimental").is_err());
}
