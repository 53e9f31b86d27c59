use std::sync::Arc;

use issuer_hooks::{
    handler_fn, ClientConfig, Error, HookConfig, ProductCompany, Reconciler, Reconciliation,
    RestClient,
};

#[tokio::main]
async fn main() {
    let client = RestClient::new(ClientConfig::new(
        "https://api.issuer.example.com",
        "client-id",
        "client-secret",
    ));

    let config = HookConfig::new("https://hooks.example.com/notifications", "kid-1")
        .with_product_company(ProductCompany::new("67890"))
        .with_disbursement_company_id("12345");

    let handler = handler_fn(|message| async move {
        println!("replayed {} ({})", message.id, message.kind);
        Ok::<(), Error>(())
    });

    match Reconciler::new(Arc::new(client), handler)
        .ensure_subscription(&config)
        .await
    {
        Ok(Reconciliation::Created { hook_id, key, .. }) => {
            println!("registered {hook_id}; store key {} in the keyring", key.id)
        }
        Ok(outcome) => println!("kept {}", outcome.hook_id()),
        Err(e) => eprintln!("reconcile failed ({}): {e}", e.status()),
    }
}
