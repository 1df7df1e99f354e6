
use crate::models::error::S2sError;

pub enum Transition<S, R> {
    Next(S, R),
    Stay(R),
    Done(R),
}

pub trait StateMachine<Ctx, Out>: Sized {
    type StepResult<'a>: Future<Output = Out> + Send + 'a
    where
        Self: 'a,
        Out: 'a,
        Ctx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut Ctx) -> Self::StepResult<'a>;
}

pub trait StateMachineCtx<Res> {
    fn execute(&mut self) -> impl Future<Output = Result<Res, S2sError>> + Send;
}
