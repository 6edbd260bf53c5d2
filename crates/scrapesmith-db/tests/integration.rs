mod integration {
    pub mod common;

    mod build_repository_tests;
}
