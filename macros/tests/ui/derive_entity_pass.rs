use composable_data_core::entity::Entity;
use composable_data_macros::Entity;

#[derive(Entity, Clone, Debug)]
#[entity(table = "notes")]
struct Note {
    id: i64,
    body: String,
    r#type: Option<String>,
}

fn main() {
    assert_eq!(Note::NAME, "notes");
    assert_eq!(Note::TYPE.name(), "type");
    assert_eq!(Note::fields().len(), 3);
}
