//! Shared fixtures and the repository contract suite.
//!
//! Every `contract_*` function takes a fresh repository and must pass
//! unchanged against both backends.
#![allow(dead_code)]

use docrepo::prelude::*;
use docrepo::storage::MemoryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const ACTOR: &str = "tester";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub sku: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub qty: i64,
}

impl Variant {
    pub fn new(sku: &str, size: &str, qty: i64) -> Self {
        Self {
            sku: sku.to_string(),
            size: size.to_string(),
            qty,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(flatten)]
    pub base: BaseEntity,
    pub name: String,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub variants: Vec<Variant>,
    #[serde(default)]
    pub user_fields: Vec<UserField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl_entity!(Product);

impl Product {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_id(id: &str, name: &str) -> Self {
        Self {
            base: BaseEntity::with_id(id),
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl HasUserFields for Product {
    fn user_fields_path() -> FieldPath<Self, Vec<UserField>> {
        field!(Product, user_fields)
    }

    fn user_fields(&self) -> &[UserField] {
        &self.user_fields
    }
}

pub fn auditor() -> Auditor {
    Auditor::new(Arc::new(FixedActor::new(ACTOR)))
}

pub fn embedded() -> StoreBackend {
    StoreBackend::open(&StoreConfig::in_memory(), auditor()).unwrap()
}

/// Starts a document server on an ephemeral port.
pub async fn spawn_server() -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = CancellationToken::new();
    tokio::spawn(docrepo::server::serve(
        listener,
        Arc::new(MemoryStore::new()),
        shutdown.clone(),
    ));
    (base_url, shutdown)
}

pub async fn networked() -> (StoreBackend, CancellationToken) {
    let (base_url, shutdown) = spawn_server().await;
    let backend = StoreBackend::open(&StoreConfig::networked(&base_url), auditor()).unwrap();
    (backend, shutdown)
}

pub async fn names(repo: &dyn Repository<Product>) -> Vec<String> {
    let mut names: Vec<String> = repo
        .query()
        .to_list()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.name)
        .collect();
    names.sort();
    names
}

pub async fn contract_insert_then_get(repo: Arc<dyn Repository<Product>>) {
    let mut product = Product::named("bolt");
    product.stock = 7;
    product.tags = vec!["metal".into()];

    let stored = repo.insert(product.clone()).await.unwrap();
    assert!(!stored.base.id.is_empty());
    assert_eq!(stored.base.created_by.as_deref(), Some(ACTOR));
    assert!(stored.base.created_on_utc.timestamp() > 0);
    assert!(stored.base.updated_on_utc.is_none());

    let loaded = repo.get_by_id(&stored.base.id).await.unwrap().unwrap();
    assert_eq!(loaded, stored);
    assert_eq!(loaded.name, product.name);
    assert_eq!(loaded.tags, product.tags);

    assert!(repo.get_by_id("missing").await.unwrap().is_none());
    assert!(repo.get_by_id("").await.unwrap().is_none());
    assert!(repo.get_by_id(" padded ").await.unwrap().is_none());
}

pub async fn contract_insert_keeps_caller_id(repo: Arc<dyn Repository<Product>>) {
    let stored = repo.insert(Product::with_id("p-1", "nut")).await.unwrap();
    assert_eq!(stored.base.id, "p-1");

    let duplicate = repo.insert(Product::with_id("p-1", "other")).await;
    assert!(matches!(duplicate, Err(RepoError::Validation(_))));

    let blank = repo.insert(Product::with_id(" ", "blank")).await;
    assert!(matches!(blank, Err(RepoError::Validation(_))));
}

pub async fn contract_update_stamps_audit_fields(repo: Arc<dyn Repository<Product>>) {
    let stored = repo.insert(Product::named("washer")).await.unwrap();

    let mut changed = stored.clone();
    changed.name = "washer-xl".into();
    changed.base.created_by = Some("intruder".into());
    let updated = repo.update(changed).await.unwrap();

    assert_eq!(updated.name, "washer-xl");
    assert_eq!(updated.base.created_by, stored.base.created_by);
    assert_eq!(updated.base.created_on_utc, stored.base.created_on_utc);
    assert_eq!(updated.base.updated_by.as_deref(), Some(ACTOR));
    assert!(updated.base.updated_on_utc.is_some());

    let loaded = repo.get_by_id(&stored.base.id).await.unwrap().unwrap();
    assert_eq!(loaded, updated);
}

pub async fn contract_update_replaces_whole_document(repo: Arc<dyn Repository<Product>>) {
    let mut product = Product::named("labelled");
    product.note = Some("keep?".into());
    product.tags = vec!["a".into()];
    let stored = repo.insert(product).await.unwrap();

    let mut changed = stored.clone();
    changed.note = None;
    changed.tags.clear();
    let updated = repo.update(changed).await.unwrap();
    assert_eq!(updated.note, None);
    assert!(updated.tags.is_empty());

    let loaded = repo.get_by_id(&stored.base.id).await.unwrap().unwrap();
    assert_eq!(loaded.note, None);
    assert_eq!(loaded, updated);
}

pub async fn contract_update_of_missing_id_is_not_found(repo: Arc<dyn Repository<Product>>) {
    let result = repo.update(Product::with_id("ghost", "ghost")).await;
    assert!(matches!(result, Err(RepoError::NotFound { .. })), "got {result:?}");
    assert_eq!(repo.count(Filter::all()).await.unwrap(), 0);
}

pub async fn contract_update_many_touches_only_matches(repo: Arc<dyn Repository<Product>>) {
    let test = repo.insert(Product::named("Test")).await.unwrap();
    let test2 = repo.insert(Product::named("Test2")).await.unwrap();

    let spec = UpdateBuilder::new()
        .set(field!(Product, name), "UpdateTest")
        .build()
        .unwrap();
    let result = repo
        .update_many(Filter::eq(field!(Product, name), "Test"), spec)
        .await
        .unwrap();
    assert_eq!(result, UpdateResult { matched: 1, modified: 1 });

    let renamed = repo.get_by_id(&test.base.id).await.unwrap().unwrap();
    assert_eq!(renamed.name, "UpdateTest");
    assert_eq!(renamed.base.updated_by.as_deref(), Some(ACTOR));

    let untouched = repo.get_by_id(&test2.base.id).await.unwrap().unwrap();
    assert_eq!(untouched, test2);
}

pub async fn contract_delete_by_name(repo: Arc<dyn Repository<Product>>) {
    for name in ["test1", "test2", "test3"] {
        repo.insert(Product::named(name)).await.unwrap();
    }
    let victim = repo
        .get_one(Filter::eq(field!(Product, name), "test1"))
        .await
        .unwrap()
        .unwrap();

    let result = repo.delete(&victim).await.unwrap();
    assert_eq!(result.deleted, 1);
    assert_eq!(repo.count(Filter::all()).await.unwrap(), 2);
    assert_eq!(names(repo.as_ref()).await, ["test2", "test3"]);

    let again = repo.delete(&victim).await.unwrap();
    assert_eq!(again.deleted, 0);
    assert_eq!(repo.count(Filter::all()).await.unwrap(), 2);
}

pub async fn contract_delete_many(repo: Arc<dyn Repository<Product>>) {
    for (name, stock) in [("a", 0), ("b", 5), ("c", 0)] {
        let mut product = Product::named(name);
        product.stock = stock;
        repo.insert(product).await.unwrap();
    }
    let result = repo
        .delete_many(Filter::eq(field!(Product, stock), 0))
        .await
        .unwrap();
    assert_eq!(result.deleted, 2);
    assert_eq!(names(repo.as_ref()).await, ["b"]);

    assert_eq!(repo.clear().await.unwrap().deleted, 1);
    assert_eq!(repo.count(Filter::all()).await.unwrap(), 0);
}

pub async fn contract_concurrent_increments(repo: Arc<dyn Repository<Product>>) {
    const N: i64 = 25;
    let counter = repo.insert(Product::named("counter")).await.unwrap();

    let increments = (0..N).map(|_| {
        let repo = Arc::clone(&repo);
        let id = counter.base.id.clone();
        tokio::spawn(async move { repo.inc_field(&id, field!(Product, stock), 1).await })
    });
    for result in futures::future::join_all(increments).await {
        assert_eq!(result.unwrap().unwrap().modified, 1);
    }

    let loaded = repo.get_by_id(&counter.base.id).await.unwrap().unwrap();
    assert_eq!(loaded.stock, N);
}

pub async fn contract_field_update(repo: Arc<dyn Repository<Product>>) {
    let stored = repo.insert(Product::named("gear")).await.unwrap();

    let result = repo
        .update_field(&stored.base.id, field!(Product, name), "cog")
        .await
        .unwrap();
    assert_eq!(result, UpdateResult { matched: 1, modified: 1 });

    // Writing the same value again matches but changes nothing.
    let result = repo
        .update_field(&stored.base.id, field!(Product, name), "cog")
        .await
        .unwrap();
    assert_eq!(result, UpdateResult { matched: 1, modified: 0 });

    let result = repo
        .update_field("missing", field!(Product, name), "x")
        .await
        .unwrap();
    assert_eq!(result, UpdateResult::default());
}

pub async fn contract_pull_all_across_documents(repo: Arc<dyn Repository<Product>>) {
    let mut ids = vec![];
    for i in 0..4 {
        let mut product = Product::named(&format!("tagged{i}"));
        product.tags = vec!["sale".into(), format!("t{i}")];
        ids.push(repo.insert(product).await.unwrap().base.id);
    }
    let mut plain = Product::named("plain");
    plain.tags = vec!["new".into()];
    let plain = repo.insert(plain).await.unwrap();

    let result = repo
        .pull(Target::All, field!(Product, tags), "sale".to_string())
        .await
        .unwrap();
    assert_eq!(result.modified, 4);

    for (i, id) in ids.iter().enumerate() {
        let product = repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(product.tags, [format!("t{i}")]);
    }
    let untouched = repo.get_by_id(&plain.base.id).await.unwrap().unwrap();
    assert_eq!(untouched, plain);

    // Pulling a value that is already gone is a quiet no-op.
    let again = repo
        .pull(Target::All, field!(Product, tags), "sale".to_string())
        .await
        .unwrap();
    assert_eq!(again.modified, 0);
}

pub async fn contract_add_to_set_broadcast(repo: Arc<dyn Repository<Product>>) {
    let a = repo.insert(Product::named("a")).await.unwrap();
    let b = repo.insert(Product::named("b")).await.unwrap();

    let result = repo
        .add_to_set(Target::All, field!(Product, tags), "fixed".to_string())
        .await
        .unwrap();
    assert_eq!(result, UpdateResult { matched: 2, modified: 2 });

    repo.add_to_set(Target::id(a.base.id.as_str()), field!(Product, tags), "only-a".to_string())
        .await
        .unwrap();

    assert_eq!(repo.get_by_id(&a.base.id).await.unwrap().unwrap().tags, ["fixed", "only-a"]);
    assert_eq!(repo.get_by_id(&b.base.id).await.unwrap().unwrap().tags, ["fixed"]);
}

pub async fn contract_pull_filter_keeps_survivor_order(repo: Arc<dyn Repository<Product>>) {
    let mut product = Product::named("shirt");
    product.variants = vec![
        Variant::new("s1", "S", 0),
        Variant::new("m1", "M", 4),
        Variant::new("s2", "S", 2),
        Variant::new("l1", "L", 0),
        Variant::new("x1", "XL", 9),
    ];
    let stored = repo.insert(product).await.unwrap();

    let result = repo
        .pull_filter(
            &stored.base.id,
            field!(Product, variants),
            Filter::eq(field!(Variant, qty), 0),
        )
        .await
        .unwrap();
    assert_eq!(result.modified, 1);

    let loaded = repo.get_by_id(&stored.base.id).await.unwrap().unwrap();
    let skus: Vec<&str> = loaded.variants.iter().map(|v| v.sku.as_str()).collect();
    assert_eq!(skus, ["m1", "s2", "x1"]);
}

pub async fn contract_pull_by_key(repo: Arc<dyn Repository<Product>>) {
    let mut product = Product::named("boot");
    product.variants = vec![Variant::new("b1", "40", 1), Variant::new("b2", "41", 1)];
    let stored = repo.insert(product).await.unwrap();

    repo.pull_by_key(
        Target::id(stored.base.id.as_str()),
        field!(Product, variants),
        field!(Variant, sku),
        "b1",
    )
    .await
    .unwrap();

    let loaded = repo.get_by_id(&stored.base.id).await.unwrap().unwrap();
    assert_eq!(loaded.variants, [Variant::new("b2", "41", 1)]);
}

pub async fn contract_update_to_set(repo: Arc<dyn Repository<Product>>) {
    let mut product = Product::named("sock");
    product.variants = vec![
        Variant::new("a", "S", 1),
        Variant::new("b", "S", 1),
        Variant::new("c", "M", 1),
    ];
    let stored = repo.insert(product).await.unwrap();
    let id = stored.base.id.as_str();

    let small = || Filter::eq(field!(Variant, size), "S");
    let result = repo
        .update_to_set(id, field!(Product, variants), small(), Variant::new("a2", "S", 5))
        .await
        .unwrap();
    assert_eq!(result.modified, 1);
    let loaded = repo.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(loaded.variants[0], Variant::new("a2", "S", 5));
    assert_eq!(loaded.variants[1], Variant::new("b", "S", 1));

    repo.update_to_set_all(id, field!(Product, variants), small(), Variant::new("s", "S", 0))
        .await
        .unwrap();
    let loaded = repo.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(loaded.variants[0], Variant::new("s", "S", 0));
    assert_eq!(loaded.variants[1], Variant::new("s", "S", 0));
    assert_eq!(loaded.variants[2], Variant::new("c", "M", 1));

    let before = repo.get_by_id(id).await.unwrap().unwrap();
    let result = repo
        .update_to_set(
            id,
            field!(Product, variants),
            Filter::eq(field!(Variant, size), "XXL"),
            Variant::new("z", "XXL", 1),
        )
        .await
        .unwrap();
    assert_eq!(result, UpdateResult { matched: 1, modified: 0 });
    assert_eq!(repo.get_by_id(id).await.unwrap().unwrap(), before);
}

pub async fn contract_element_field_update(repo: Arc<dyn Repository<Product>>) {
    let mut product = Product::named("hat");
    product.variants = vec![Variant::new("h1", "S", 1), Variant::new("h2", "M", 1)];
    let stored = repo.insert(product).await.unwrap();

    let spec = UpdateBuilder::new()
        .inc_element(
            field!(Product, variants)
                .matching(Filter::eq(field!(Variant, sku), "h2"))
                .field(field!(Variant, qty)),
            10,
        )
        .build()
        .unwrap();
    repo.update_one(Filter::id(stored.base.id.as_str()), spec)
        .await
        .unwrap();

    let loaded = repo.get_by_id(&stored.base.id).await.unwrap().unwrap();
    assert_eq!(loaded.variants[0].qty, 1);
    assert_eq!(loaded.variants[1].qty, 11);
}

pub async fn contract_sub_document_ops_on_missing_parent(repo: Arc<dyn Repository<Product>>) {
    let result = repo
        .add_to_set(Target::id("nobody"), field!(Product, tags), "x".to_string())
        .await
        .unwrap();
    assert_eq!(result, UpdateResult::default());

    let result = repo
        .pull_filter("nobody", field!(Product, variants), Filter::all())
        .await
        .unwrap();
    assert_eq!(result, UpdateResult::default());
    assert_eq!(repo.count(Filter::all()).await.unwrap(), 0);
}

pub async fn contract_failed_update_changes_nothing(repo: Arc<dyn Repository<Product>>) {
    let stored = repo.insert(Product::named("atomic")).await.unwrap();

    // `name` is a string, so the increment fails after the set was staged.
    let spec = UpdateSpec::<Product>::from_instructions(vec![
        docrepo::update::Instruction::set("stock", serde_json::json!(3)),
        docrepo::update::Instruction::new(
            docrepo::path::ResolvedPath::field("name"),
            docrepo::update::UpdateOp::Inc { amount: 1.into() },
        ),
    ])
    .unwrap();
    let result = repo.update_one(Filter::id(stored.base.id.as_str()), spec).await;
    assert!(matches!(result, Err(RepoError::Validation(_))), "got {result:?}");

    let loaded = repo.get_by_id(&stored.base.id).await.unwrap().unwrap();
    assert_eq!(loaded, stored);
}

pub async fn contract_failed_batch_update_writes_nothing(repo: Arc<dyn Repository<Product>>) {
    let first = repo.insert(Product::named("first")).await.unwrap();
    let second = repo.insert(Product::named("second")).await.unwrap();
    let counter = |value: serde_json::Value| {
        UpdateSpec::<Product>::from_instructions(vec![docrepo::update::Instruction::set("counter", value)]).unwrap()
    };
    repo.update_one(Filter::id(first.base.id.as_str()), counter(serde_json::json!(1)))
        .await
        .unwrap();
    repo.update_one(Filter::id(second.base.id.as_str()), counter(serde_json::json!("x")))
        .await
        .unwrap();
    let before = (
        repo.get_by_id(&first.base.id).await.unwrap().unwrap(),
        repo.get_by_id(&second.base.id).await.unwrap().unwrap(),
    );

    // The counter increment only fails on the second document.
    let spec = UpdateSpec::<Product>::from_instructions(vec![
        docrepo::update::Instruction::new(
            docrepo::path::ResolvedPath::field("stock"),
            docrepo::update::UpdateOp::Inc { amount: 1.into() },
        ),
        docrepo::update::Instruction::new(
            docrepo::path::ResolvedPath::field("counter"),
            docrepo::update::UpdateOp::Inc { amount: 1.into() },
        ),
    ])
    .unwrap();
    let err = repo.update_many(Filter::all(), spec).await.unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)), "got {err:?}");
    assert_eq!(err.to_string().matches("Validation error").count(), 1, "{err}");

    let after = (
        repo.get_by_id(&first.base.id).await.unwrap().unwrap(),
        repo.get_by_id(&second.base.id).await.unwrap().unwrap(),
    );
    assert_eq!(after, before);
    assert_eq!(after.0.stock, 0);
}

pub async fn contract_query(repo: Arc<dyn Repository<Product>>) {
    for (name, stock) in [("d", 4), ("a", 1), ("c", 3), ("b", 2), ("e", 3)] {
        let mut product = Product::named(name);
        product.stock = stock;
        repo.insert(product).await.unwrap();
    }

    let page = repo
        .query()
        .filter(Filter::gte(field!(Product, stock), 2))
        .order_by_desc(field!(Product, stock))
        .then_by(field!(Product, name))
        .skip(1)
        .take(2)
        .to_list()
        .await
        .unwrap();
    let page: Vec<&str> = page.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(page, ["c", "e"]);

    let query = repo.query().filter(Filter::eq(field!(Product, stock), 3));
    assert_eq!(query.count().await.unwrap(), 2);
    assert!(query.any().await.unwrap());

    // Queries re-run against current state.
    repo.delete_many(Filter::eq(field!(Product, stock), 3)).await.unwrap();
    assert_eq!(query.count().await.unwrap(), 0);
    assert_eq!(repo.count(Filter::all()).await.unwrap(), 3);
}

pub async fn contract_user_fields(repo: Arc<dyn Repository<Product>>) {
    let stored = repo.insert(Product::named("tenanted")).await.unwrap();
    let id = stored.base.id.as_str();

    repo.save_user_field(id, "color", "red", "").await.unwrap();
    repo.save_user_field(id, "color", "blue", "store-1").await.unwrap();
    repo.save_user_field(id, "color", "green", "").await.unwrap();

    let loaded = repo.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(
        loaded.user_fields,
        [
            UserField::new("color", "green", ""),
            UserField::new("color", "blue", "store-1"),
        ]
    );
    assert_eq!(loaded.user_field("color", "store-1").map(|f| f.value.as_str()), Some("blue"));

    repo.save_user_field(id, "color", "", "").await.unwrap();
    let loaded = repo.get_by_id(id).await.unwrap().unwrap();
    assert_eq!(loaded.user_fields, [UserField::new("color", "blue", "store-1")]);

    let missing = repo.save_user_field("nobody", "k", "v", "").await.unwrap();
    assert_eq!(missing, UpdateResult::default());
}
