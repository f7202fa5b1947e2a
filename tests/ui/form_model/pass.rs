use plainform::form::{FieldLens, FormModel};

#[derive(Clone, plainform::form::FormModel)]
struct DemoForm {
    email: String,
}

fn main() {
    let fields = DemoForm::fields();
    let lens = fields.email();
    let mut model = DemoForm {
        email: "a@plain.form".to_string(),
    };
    lens.set(&mut model, "b@plain.form".to_string());
    assert_eq!(lens.key().as_str(), "email");
    assert_eq!(lens.get(&model), "b@plain.form");
    assert_eq!(DemoForm::field_keys().len(), 1);
}
