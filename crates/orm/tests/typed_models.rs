//! Typed models through `Database::crud`

use relgraph_orm::{
    Database, FindOptions, ForeignRef, MemoryStorage, Model, ModelDescriptor, OrmConfig, ScalarType, TypeDecl,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Author {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    books: Option<Vec<Book>>,
}

impl Model for Author {
    fn model_name() -> &'static str {
        "Author"
    }

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::new("Author")
            .field("id", ScalarType::Int64)
            .field("name", ScalarType::Text)
            .field("books", TypeDecl::list(TypeDecl::named("Book")))
            .back_reference("books", "author")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Book {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    title: String,
    author: ForeignRef<Author, i64>,
}

impl Model for Book {
    fn model_name() -> &'static str {
        "Book"
    }

    fn descriptor() -> ModelDescriptor {
        ModelDescriptor::new("Book")
            .field("id", ScalarType::Int64)
            .field("title", ScalarType::Text)
            .field("author", TypeDecl::named("Author"))
            .indexed("author")
    }
}

fn library() -> Database<MemoryStorage> {
    let mut db = Database::new(MemoryStorage::new(), OrmConfig::testing());
    db.register::<Author>().unwrap();
    db.register::<Book>().unwrap();
    db.init().unwrap();
    db
}

fn author(name: &str) -> Author {
    Author {
        id: None,
        name: name.to_string(),
        books: None,
    }
}

#[tokio::test]
async fn test_typed_insert_and_find() {
    let db = library();
    let ann = db.crud::<Author>().insert(&author("ann")).await.unwrap();
    let id = ann.id.unwrap();

    let book = db
        .crud::<Book>()
        .insert(&Book {
            id: None,
            title: "Relations".to_string(),
            author: ForeignRef::Key(id),
        })
        .await
        .unwrap();
    assert!(book.id.is_some());
    assert_eq!(book.author.as_key(), Some(&id));

    let loaded = db.crud::<Book>().find(book.id.unwrap()).await.unwrap().unwrap();
    let loaded_author = loaded.author.as_loaded().unwrap();
    assert_eq!(loaded_author.name, "ann");
    assert_eq!(loaded_author.books, None);

    let shallow = db.crud::<Book>().find_one(book.id.unwrap(), 0).await.unwrap().unwrap();
    assert_eq!(shallow.author, ForeignRef::Key(id));

    let ann = db.crud::<Author>().find(id).await.unwrap().unwrap();
    let books = ann.books.unwrap();
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].title, "Relations");
}

#[tokio::test]
async fn test_loaded_parent_is_stored_as_key() {
    let db = library();
    let bob = db.crud::<Author>().insert(&author("bob")).await.unwrap();

    let book = db
        .crud::<Book>()
        .insert(&Book {
            id: None,
            title: "Keys".to_string(),
            author: ForeignRef::loaded(bob.clone()),
        })
        .await
        .unwrap();

    let stored = db.crud::<Book>().find_one(book.id.unwrap(), 0).await.unwrap().unwrap();
    assert_eq!(stored.author.as_key(), bob.id.as_ref());
}

#[tokio::test]
async fn test_typed_update_delete_and_find_many() {
    let db = library();
    let mut cat = db.crud::<Author>().insert(&author("cat")).await.unwrap();
    db.crud::<Author>().insert(&author("dan")).await.unwrap();

    cat.name = "catherine".to_string();
    db.crud::<Author>().update(&cat).await.unwrap();

    let page = db
        .crud::<Author>()
        .find_many(&FindOptions::new().filter("name", "catherine").depth(0))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page.data[0].id, cat.id);

    assert!(db.crud::<Author>().delete(cat.id.unwrap()).await.unwrap());
    assert!(db.crud::<Author>().find(cat.id.unwrap()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_typed_upsert() {
    let db = library();
    let mut eve = db.crud::<Author>().upsert(&author("eve")).await.unwrap();
    assert!(eve.id.is_some());

    eve.name = "evelyn".to_string();
    db.crud::<Author>().upsert(&eve).await.unwrap();

    let loaded = db.crud::<Author>().find_one(eve.id.unwrap(), 0).await.unwrap().unwrap();
    assert_eq!(loaded.name, "evelyn");
    assert_eq!(db.storage().row_count("author").await, 1);
}
