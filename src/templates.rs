use std::sync::OnceLock;
use tera::Tera;

static TERA: OnceLock<Tera> = OnceLock::new();

/// Certificate templates are Typst documents with Tera placeholders, loaded
/// once from the `templates/` directory and keyed by file name.
pub fn get_tera() -> &'static Tera {
    TERA.get_or_init(|| {
        let mut tera = Tera::default();
        let template_dir = std::path::Path::new("templates");
        if template_dir.exists() {
            tera.add_template_files(
                std::fs::read_dir(template_dir)
                    .unwrap()
                    .filter_map(Result::ok)
                    .filter(|e| e.path().extension().map_or(false, |ext| ext == "typ"))
                    .map(|e| {
                        (
                            e.path(),
                            e.path().file_name().and_then(|n| n.to_str()).map(String::from),
                        )
                    }),
            )
            .expect("Failed to load templates");
        }
        tera
    })
}
