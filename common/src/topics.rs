pub const TOPIC_ROOT: &str = "doas";

pub fn sensors_topic(equipment_id: &str) -> String {
    format!("{TOPIC_ROOT}/{equipment_id}/sensors")
}

pub fn overrides_topic(equipment_id: &str) -> String {
    format!("{TOPIC_ROOT}/{equipment_id}/overrides")
}

pub fn result_topic(equipment_id: &str) -> String {
    format!("{TOPIC_ROOT}/{equipment_id}/result")
}

pub fn status_topic(equipment_id: &str) -> String {
    format!("{TOPIC_ROOT}/{equipment_id}/status")
}
