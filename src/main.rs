use kubernetes_plugin::app;

fn main() {
    let code = app::run();
    std::process::exit(code);
}
